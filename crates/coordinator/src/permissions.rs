//! Permission enforcement: `admin` implies every other permission; every
//! operation is also scoped to the caller's own branch.

use crate::error::{ErrorKind, Result};
use ledger_metadata::UserRecord;

/// Checks that `user` may perform `required` against `branch`.
///
/// `admin` passes unconditionally once the branch matches. Cross-branch
/// access is always rejected, even for an admin of a different tenant —
/// there is no "superuser" above the per-tenant branch boundary.
pub fn check(user: &UserRecord, branch: &str, required: &str) -> Result<()> {
    if user.branch != branch {
        return Err(ErrorKind::Forbidden(format!("user {} does not have access to branch {branch}", user.username)).into());
    }
    if user.has_permission(required) {
        return Ok(());
    }
    Err(ErrorKind::Forbidden(format!("user {} lacks {required} permission", user.username)).into())
}
