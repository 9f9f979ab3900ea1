pub mod approvals;
pub mod attachments;
pub mod connection;
pub mod dashboard;
pub mod errors;
pub mod ledger;
pub mod master_data;
pub mod notify;
pub mod reconcile;
pub mod requests;
pub mod sync;

use crate::{domain::models::Role, infrastructure::auth::AuthenticatedUser};

use errors::ServiceError;

pub(crate) fn ensure_admin(user: &AuthenticatedUser) -> Result<(), ServiceError> {
    if user.role == Role::Admin {
        Ok(())
    } else {
        Err(ServiceError::Forbidden)
    }
}
