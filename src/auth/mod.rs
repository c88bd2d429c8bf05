use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::entities::ActorRole;
use crate::errors::ServiceError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The caller of a request: who they are and in which role they act.
///
/// Authentication happens upstream at the API gateway, which forwards the
/// resolved identity in `X-User-Id` / `X-User-Role`. This service trusts
/// those headers; a request without a well-formed pair is rejected before
/// any handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: ActorRole,
}

impl Identity {
    pub fn new(user_id: Uuid, role: ActorRole) -> Self {
        Self { user_id, role }
    }

    /// Identity for operator tooling and internal machinery.
    pub fn system(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: ActorRole::System,
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == ActorRole::System
    }

    /// Guard for endpoints only one role may call.
    pub fn require_role(&self, role: ActorRole) -> Result<(), ServiceError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ServiceError::AccessDenied(format!(
                "This operation requires the {} role",
                role
            )))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_value(parts, USER_ID_HEADER)
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or_else(|| {
                ServiceError::AccessDenied("Missing or malformed X-User-Id header".to_string())
            })?;

        let role = header_value(parts, USER_ROLE_HEADER)
            .and_then(ActorRole::parse)
            .ok_or_else(|| {
                ServiceError::AccessDenied("Missing or malformed X-User-Role header".to_string())
            })?;

        Ok(Identity { user_id, role })
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/orders");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[tokio::test]
    async fn extracts_identity_from_gateway_headers() {
        let user = Uuid::new_v4();
        let id = user.to_string();
        let mut parts = parts_with(&[(USER_ID_HEADER, id.as_str()), (USER_ROLE_HEADER, "courier")]);

        let identity = Identity::from_request_parts(&mut parts, &())
            .await
            .expect("headers are well-formed");

        assert_eq!(identity.user_id, user);
        assert_eq!(identity.role, ActorRole::Courier);
    }

    #[tokio::test]
    async fn missing_user_id_is_rejected() {
        let mut parts = parts_with(&[(USER_ROLE_HEADER, "customer")]);
        let err = Identity::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn malformed_user_id_is_rejected() {
        let mut parts = parts_with(&[(USER_ID_HEADER, "not-a-uuid"), (USER_ROLE_HEADER, "customer")]);
        let err = Identity::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let id = Uuid::new_v4().to_string();
        let mut parts = parts_with(&[(USER_ID_HEADER, id.as_str()), (USER_ROLE_HEADER, "admin")]);
        let err = Identity::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AccessDenied(_)));
    }

    #[test]
    fn require_role_matches_exactly() {
        let courier = Identity::new(Uuid::new_v4(), ActorRole::Courier);
        assert!(courier.require_role(ActorRole::Courier).is_ok());
        assert!(courier.require_role(ActorRole::System).is_err());

        let system = Identity::system(Uuid::new_v4());
        assert!(system.is_system());
        assert!(system.require_role(ActorRole::Courier).is_err());
    }
}
