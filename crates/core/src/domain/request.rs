use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(format!("req-{}", Uuid::new_v4()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    SoftwareLicense,
    Hardware,
    ConsultingService,
    Other,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SoftwareLicense => "software_license",
            Self::Hardware => "hardware",
            Self::ConsultingService => "consulting_service",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "software_license" => Some(Self::SoftwareLicense),
            "hardware" => Some(Self::Hardware),
            "consulting_service" => Some(Self::ConsultingService),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Cancelled,
    ClosedFulfilled,
    ClosedUnfulfilled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::ClosedFulfilled => "closed_fulfilled",
            Self::ClosedUnfulfilled => "closed_unfulfilled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending_approval" => Some(Self::PendingApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "closed_fulfilled" => Some(Self::ClosedFulfilled),
            "closed_unfulfilled" => Some(Self::ClosedUnfulfilled),
            _ => None,
        }
    }

    /// Cancelled and rejected requests accept resubmission only; the closed
    /// statuses accept nothing.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Cancelled | Self::ClosedFulfilled | Self::ClosedUnfulfilled
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub owner_id: String,
    pub product_type: ProductType,
    pub quantity: u32,
    pub promised_delivery_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub status: RequestStatus,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub row_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration_date
    }

    pub fn lease_is_live(&self, now: DateTime<Utc>) -> bool {
        match (&self.lease_owner, self.lease_expires_at) {
            (Some(_), Some(expires_at)) => now < expires_at,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{ProductType, Request, RequestId, RequestStatus};

    fn request(status: RequestStatus) -> Request {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid timestamp");
        Request {
            id: RequestId("req-1".to_string()),
            owner_id: "user-7".to_string(),
            product_type: ProductType::Hardware,
            quantity: 4,
            promised_delivery_date: created + Duration::days(14),
            expiration_date: created + Duration::days(30),
            status,
            lease_owner: None,
            lease_expires_at: None,
            row_version: 1,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn status_round_trips_from_storage_encoding() {
        let cases = [
            RequestStatus::Draft,
            RequestStatus::PendingApproval,
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Cancelled,
            RequestStatus::ClosedFulfilled,
            RequestStatus::ClosedUnfulfilled,
        ];

        for status in cases {
            assert_eq!(RequestStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn product_type_round_trips_from_storage_encoding() {
        let cases = [
            ProductType::SoftwareLicense,
            ProductType::Hardware,
            ProductType::ConsultingService,
            ProductType::Other,
        ];

        for product_type in cases {
            assert_eq!(ProductType::parse(product_type.as_str()), Some(product_type));
        }
    }

    #[test]
    fn unknown_status_encoding_is_rejected() {
        assert_eq!(RequestStatus::parse("expired"), None);
        assert_eq!(RequestStatus::parse(""), None);
    }

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let first = RequestId::generate();
        let second = RequestId::generate();
        assert!(first.0.starts_with("req-"));
        assert_ne!(first, second);
    }

    #[test]
    fn terminal_statuses_are_the_four_resting_states() {
        assert!(!RequestStatus::Draft.is_terminal());
        assert!(!RequestStatus::PendingApproval.is_terminal());
        assert!(!RequestStatus::Approved.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(RequestStatus::ClosedFulfilled.is_terminal());
        assert!(RequestStatus::ClosedUnfulfilled.is_terminal());
    }

    #[test]
    fn expiry_includes_the_deadline_instant() {
        let request = request(RequestStatus::Approved);
        assert!(!request.is_expired(request.expiration_date - Duration::seconds(1)));
        assert!(request.is_expired(request.expiration_date));
        assert!(request.is_expired(request.expiration_date + Duration::seconds(1)));
    }

    #[test]
    fn lease_liveness_requires_owner_and_future_expiry() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).single().expect("valid timestamp");
        let mut request = request(RequestStatus::Approved);
        assert!(!request.lease_is_live(now));

        request.lease_owner = Some("scheduler-1".to_string());
        request.lease_expires_at = Some(now + Duration::seconds(30));
        assert!(request.lease_is_live(now));

        request.lease_expires_at = Some(now - Duration::seconds(1));
        assert!(!request.lease_is_live(now));
    }
}
