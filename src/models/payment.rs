use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::{PaymentMethod, PaymentStatus};

/// Settlement of one appointment.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub appointment_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    #[sqlx(try_from = "String")]
    pub payment_method: PaymentMethod,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub refund_amount_cents: Option<i64>,
    pub refund_reason: Option<String>,
    pub blockchain_tx_hash: Option<String>,
}

pub const PAYMENT_COLUMNS: &str = "payment_id, appointment_id, amount_cents, currency, \
     payment_method, status, transaction_id, paid_at, refund_amount_cents, refund_reason, blockchain_tx_hash";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("currency must be a 3-letter ISO code")]
    Currency,
    #[error("only completed payments can be refunded (current status: {0})")]
    NotRefundable(PaymentStatus),
    #[error("refund of {requested} exceeds paid amount {paid}")]
    RefundTooLarge { requested: i64, paid: i64 },
    #[error("refund reason is required")]
    MissingReason,
}

/// Upper-cases and checks an ISO 4217 style code.
pub fn normalize_currency(raw: &str) -> Result<String, PaymentError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(PaymentError::Currency)
    }
}

impl Payment {
    /// Applies a refund in place. A refund of the full amount marks the payment Refunded.
    pub fn apply_refund(&mut self, amount_cents: i64, reason: &str) -> Result<(), PaymentError> {
        if self.status != PaymentStatus::Completed {
            return Err(PaymentError::NotRefundable(self.status));
        }
        if amount_cents <= 0 {
            return Err(PaymentError::NonPositiveAmount);
        }
        if amount_cents > self.amount_cents {
            return Err(PaymentError::RefundTooLarge {
                requested: amount_cents,
                paid: self.amount_cents,
            });
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(PaymentError::MissingReason);
        }

        self.refund_amount_cents = Some(amount_cents);
        self.refund_reason = Some(reason.to_string());
        self.status = if amount_cents == self.amount_cents {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paid(amount: i64) -> Payment {
        Payment {
            payment_id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            amount_cents: amount,
            currency: "USD".into(),
            payment_method: PaymentMethod::Card,
            status: PaymentStatus::Completed,
            transaction_id: Some("txn_1".into()),
            paid_at: Utc::now(),
            refund_amount_cents: None,
            refund_reason: None,
            blockchain_tx_hash: None,
        }
    }

    #[test]
    fn partial_then_rejected_second_refund() {
        let mut p = paid(10_000);
        p.apply_refund(2_500, "late cancellation fee kept").unwrap();
        assert_eq!(p.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(p.refund_amount_cents, Some(2_500));

        let err = p.apply_refund(100, "again").unwrap_err();
        assert_eq!(err, PaymentError::NotRefundable(PaymentStatus::PartiallyRefunded));
    }

    #[test]
    fn full_refund_marks_refunded() {
        let mut p = paid(4_000);
        p.apply_refund(4_000, "provider unavailable").unwrap();
        assert_eq!(p.status, PaymentStatus::Refunded);
    }

    #[test]
    fn refund_bounds() {
        let mut p = paid(1_000);
        assert_eq!(
            p.apply_refund(1_001, "x").unwrap_err(),
            PaymentError::RefundTooLarge { requested: 1_001, paid: 1_000 }
        );
        assert_eq!(p.apply_refund(0, "x").unwrap_err(), PaymentError::NonPositiveAmount);
        assert_eq!(p.apply_refund(10, "  ").unwrap_err(), PaymentError::MissingReason);
        assert_eq!(p.status, PaymentStatus::Completed);
    }

    #[test]
    fn currency_codes() {
        assert_eq!(normalize_currency(" usd ").unwrap(), "USD");
        assert_eq!(normalize_currency("US").unwrap_err(), PaymentError::Currency);
        assert_eq!(normalize_currency("U$D").unwrap_err(), PaymentError::Currency);
    }
}
