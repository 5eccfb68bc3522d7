use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::PermissionType;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Module {
    pub module_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub code: String,
    pub is_active: bool,
    pub display_order: i32,
    pub icon_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Permission {
    pub permission_id: Uuid,
    pub module_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub code: String,
    #[sqlx(try_from = "String")]
    pub permission_type: PermissionType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const PERMISSION_COLUMNS: &str = "permission_id, module_id, name, description, code, \
     permission_type, is_active, created_at, updated_at";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Role {
    pub role_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserRole {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

/// An active, visible menu row plus the permissions that gate it (empty = ungated).
#[derive(Debug, Clone, FromRow)]
pub struct MenuEntry {
    pub menu_id: Uuid,
    pub module_id: Uuid,
    pub parent_menu_id: Option<Uuid>,
    pub name: String,
    pub url: Option<String>,
    pub icon_name: Option<String>,
    pub display_order: i32,
    pub required_permissions: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuNode {
    pub menu_id: Uuid,
    pub module_id: Uuid,
    pub name: String,
    pub url: Option<String>,
    pub icon_name: Option<String>,
    pub display_order: i32,
    pub children: Vec<MenuNode>,
}

/// Builds the navigation tree a user may see.
///
/// A menu is shown when it is ungated or the user holds any of its permissions.
/// A hidden menu hides its whole subtree. Siblings are ordered by display order, then name.
pub fn build_menu_tree(entries: Vec<MenuEntry>, held: &HashSet<Uuid>) -> Vec<MenuNode> {
    let visible: Vec<MenuEntry> = entries
        .into_iter()
        .filter(|e| {
            e.required_permissions.is_empty()
                || e.required_permissions.iter().any(|p| held.contains(p))
        })
        .collect();

    let mut by_parent: HashMap<Option<Uuid>, Vec<MenuEntry>> = HashMap::new();
    for entry in visible {
        by_parent.entry(entry.parent_menu_id).or_default().push(entry);
    }

    fn attach(
        parent: Option<Uuid>,
        by_parent: &mut HashMap<Option<Uuid>, Vec<MenuEntry>>,
    ) -> Vec<MenuNode> {
        let mut level = by_parent.remove(&parent).unwrap_or_default();
        level.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then_with(|| a.name.cmp(&b.name))
        });
        level
            .into_iter()
            .map(|e| MenuNode {
                menu_id: e.menu_id,
                module_id: e.module_id,
                name: e.name,
                url: e.url,
                icon_name: e.icon_name,
                display_order: e.display_order,
                children: attach(Some(e.menu_id), by_parent),
            })
            .collect()
    }

    // children of hidden parents are never reached from the root
    attach(None, &mut by_parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, order: i32, parent: Option<Uuid>, gate: Vec<Uuid>) -> MenuEntry {
        MenuEntry {
            menu_id: Uuid::new_v4(),
            module_id: Uuid::nil(),
            parent_menu_id: parent,
            name: name.into(),
            url: None,
            icon_name: None,
            display_order: order,
            required_permissions: gate,
        }
    }

    #[test]
    fn nests_children_and_orders_siblings() {
        let root = entry("Scheduling", 1, None, vec![]);
        let later = entry("Billing", 2, None, vec![]);
        let child_b = entry("Week", 2, Some(root.menu_id), vec![]);
        let child_a = entry("Day", 1, Some(root.menu_id), vec![]);

        let tree = build_menu_tree(vec![later, child_b, root, child_a], &HashSet::new());
        let names: Vec<_> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Scheduling", "Billing"]);
        let children: Vec<_> = tree[0].children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(children, vec!["Day", "Week"]);
    }

    #[test]
    fn gated_menu_hides_subtree_without_permission() {
        let perm = Uuid::new_v4();
        let admin = entry("Administration", 1, None, vec![perm]);
        let audit = entry("Audit", 1, Some(admin.menu_id), vec![]);
        let entries = vec![admin, audit];

        assert!(build_menu_tree(entries.clone(), &HashSet::new()).is_empty());

        let held: HashSet<Uuid> = [perm].into_iter().collect();
        let tree = build_menu_tree(entries, &held);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children[0].name, "Audit");
    }
}
