use std::sync::Arc;

use crate::services::{appointment::AppointmentService, audit::AuditTrail};

mod access;
mod appointment;
mod audit;
mod enums;
mod facility;
mod identity;
mod payment;

pub use access::*;
pub use appointment::*;
pub use audit::*;
pub use enums::*;
pub use facility::*;
pub use identity::*;
pub use payment::*;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub refresh_ttl_hours: i64,
    pub appointments: AppointmentService,
    pub audit: Arc<dyn AuditTrail>,
}
