//! Blockchain collaborator. The returned handle is stored verbatim on the
//! appointment; nothing here interprets it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Appointment;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("ledger returned an empty transaction handle")]
    EmptyHandle,
}

#[async_trait]
pub trait BlockchainService: Send + Sync {
    async fn create_appointment_contract(
        &self,
        appointment: &Appointment,
    ) -> Result<String, LedgerError>;
}

/// Derives the handle locally from the booking itself.
#[derive(Debug, Clone, Default)]
pub struct DigestLedger;

impl DigestLedger {
    pub fn handle_for(appointment: &Appointment) -> String {
        let mut hasher = Sha256::new();
        hasher.update(appointment.appointment_id.as_bytes());
        hasher.update(appointment.patient_id.as_bytes());
        hasher.update(appointment.provider_id.as_bytes());
        hasher.update(appointment.facility_id.as_bytes());
        hasher.update(appointment.scheduled_at.to_rfc3339().as_bytes());
        hasher.update(appointment.duration_minutes.to_be_bytes());
        hasher.update(appointment.created_at.to_rfc3339().as_bytes());
        format!("0x{}", hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl BlockchainService for DigestLedger {
    async fn create_appointment_contract(
        &self,
        appointment: &Appointment,
    ) -> Result<String, LedgerError> {
        Ok(Self::handle_for(appointment))
    }
}

#[derive(Debug, Serialize)]
struct ContractRequest {
    appointment_id: Uuid,
    patient_id: Uuid,
    provider_id: Uuid,
    facility_id: Uuid,
    scheduled_at: DateTime<Utc>,
    duration_minutes: i32,
}

#[derive(Debug, Deserialize)]
struct ContractResponse {
    transaction_hash: String,
}

/// Remote contract service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLedger {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlockchainService for HttpLedger {
    async fn create_appointment_contract(
        &self,
        appointment: &Appointment,
    ) -> Result<String, LedgerError> {
        let body = ContractRequest {
            appointment_id: appointment.appointment_id,
            patient_id: appointment.patient_id,
            provider_id: appointment.provider_id,
            facility_id: appointment.facility_id,
            scheduled_at: appointment.scheduled_at,
            duration_minutes: appointment.duration_minutes,
        };

        let resp: ContractResponse = self
            .client
            .post(format!("{}/contracts/appointments", self.endpoint))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let handle = resp.transaction_hash.trim();
        if handle.is_empty() {
            return Err(LedgerError::EmptyHandle);
        }
        Ok(handle.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentStatus, AppointmentType};
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn booking() -> Appointment {
        Appointment {
            appointment_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            facility_id: Uuid::new_v4(),
            scheduled_at: Utc::now(),
            duration_minutes: 30,
            status: AppointmentStatus::Scheduled,
            appointment_type: AppointmentType::Checkup,
            notes: None,
            blockchain_tx_hash: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn digest_handle_is_stable_hex() {
        let a = booking();
        let first = DigestLedger.create_appointment_contract(&a).await.unwrap();
        let second = DigestLedger.create_appointment_contract(&a).await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("0x"));
        assert_eq!(first.len(), 2 + 64);
        assert_ne!(first, DigestLedger::handle_for(&booking()));
    }

    #[tokio::test]
    async fn http_ledger_returns_remote_hash() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contracts/appointments"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "transaction_hash": "0xabc123" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let ledger = HttpLedger::new(format!("{}/", server.uri()));
        let handle = ledger.create_appointment_contract(&booking()).await.unwrap();
        assert_eq!(handle, "0xabc123");
    }

    #[tokio::test]
    async fn http_ledger_surfaces_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let ledger = HttpLedger::new(server.uri());
        let err = ledger.create_appointment_contract(&booking()).await.unwrap_err();
        assert_matches!(err, LedgerError::Transport(_));
    }

    #[tokio::test]
    async fn http_ledger_rejects_blank_hash() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "transaction_hash": "  " })),
            )
            .mount(&server)
            .await;

        let err = HttpLedger::new(server.uri())
            .create_appointment_contract(&booking())
            .await
            .unwrap_err();
        assert_matches!(err, LedgerError::EmptyHandle);
    }
}
