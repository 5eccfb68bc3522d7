use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A stored or submitted string that does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Enums persisted as TEXT columns.
///
/// Each variant maps to exactly one canonical spelling which is what gets written
/// and serialized. Entries under `legacy` are accepted on input only.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident = $text:literal),+ $(,)?
        }
        $(legacy { $($alias:literal => $target:ident),* $(,)? })?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    $($($alias => {
                        tracing::warn!(
                            value = $alias,
                            canonical = $name::$target.as_str(),
                            "decoded legacy {} spelling",
                            stringify!($name)
                        );
                        Ok($name::$target)
                    })*)?
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

text_enum! {
    /// Appointment lifecycle. Completed, Canceled and NoShow are terminal.
    pub enum AppointmentStatus {
        Scheduled = "Scheduled",
        Confirmed = "Confirmed",
        Completed = "Completed",
        Canceled = "Canceled",
        NoShow = "NoShow",
    }
    legacy { "Cancelled" => Canceled }
}

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Canceled | AppointmentStatus::NoShow
        )
    }

    /// Whether the appointment still holds its slot on the provider's calendar.
    pub fn occupies_slot(self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }
}

text_enum! {
    pub enum AppointmentType {
        Consultation = "Consultation",
        FollowUp = "FollowUp",
        Checkup = "Checkup",
        Procedure = "Procedure",
        Telehealth = "Telehealth",
        Emergency = "Emergency",
    }
}

text_enum! {
    pub enum PaymentMethod {
        Cash = "Cash",
        Card = "Card",
        Insurance = "Insurance",
        BankTransfer = "BankTransfer",
        Crypto = "Crypto",
    }
}

text_enum! {
    pub enum PaymentStatus {
        Pending = "Pending",
        Completed = "Completed",
        Failed = "Failed",
        Refunded = "Refunded",
        PartiallyRefunded = "PartiallyRefunded",
    }
}

text_enum! {
    pub enum AvailabilityStatus {
        Active = "Active",
        Inactive = "Inactive",
    }
}

text_enum! {
    pub enum AuditAction {
        Create = "Create",
        Update = "Update",
        Delete = "Delete",
        Login = "Login",
        Logout = "Logout",
        PasswordChange = "PasswordChange",
        PasswordReset = "PasswordReset",
        RoleAssignment = "RoleAssignment",
        PermissionChange = "PermissionChange",
    }
}

text_enum! {
    pub enum PermissionType {
        View = "View",
        Create = "Create",
        Edit = "Edit",
        Delete = "Delete",
        Export = "Export",
        Import = "Import",
        Approve = "Approve",
        Reject = "Reject",
    }
}

text_enum! {
    pub enum Gender {
        Female = "Female",
        Male = "Male",
        Other = "Other",
        Unspecified = "Unspecified",
    }
}

text_enum! {
    /// Discriminator of the user specialization.
    pub enum UserType {
        Patient = "Patient",
        Provider = "Provider",
    }
}

text_enum! {
    pub enum SessionStatus {
        Active = "Active",
        Revoked = "Revoked",
        Expired = "Expired",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_accepts_both_cancel_spellings() {
        assert_eq!("Canceled".parse::<AppointmentStatus>(), Ok(AppointmentStatus::Canceled));
        assert_eq!("Cancelled".parse::<AppointmentStatus>(), Ok(AppointmentStatus::Canceled));
        assert_eq!(AppointmentStatus::Canceled.as_str(), "Canceled");
    }

    #[test]
    fn unknown_variant_names_the_enum() {
        let err = "Pending".parse::<AppointmentStatus>().unwrap_err();
        assert_eq!(err.kind, "AppointmentStatus");
        assert_eq!(err.to_string(), "unknown AppointmentStatus: \"Pending\"");
    }

    #[test]
    fn serde_uses_canonical_text() {
        let json = serde_json::to_string(&AppointmentStatus::NoShow).unwrap();
        assert_eq!(json, "\"NoShow\"");

        let legacy: AppointmentStatus = serde_json::from_str("\"Cancelled\"").unwrap();
        assert_eq!(legacy, AppointmentStatus::Canceled);

        assert!(serde_json::from_str::<PaymentMethod>("\"Barter\"").is_err());
    }

    #[test]
    fn terminal_states() {
        let terminal: Vec<_> = AppointmentStatus::ALL
            .iter()
            .copied()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Canceled,
                AppointmentStatus::NoShow
            ]
        );
        assert!(AppointmentStatus::Confirmed.occupies_slot());
        assert!(!AppointmentStatus::NoShow.occupies_slot());
    }
}
