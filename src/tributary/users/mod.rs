mod user;
mod pending;
mod service;
mod reconcile;

pub use self::user::{User, UserPatch, parse_birth_date, ALLOWED_COLUMNS, DATE_OF_BIRTH};
pub use self::pending::PendingRepairs;
pub use self::service::{UserService, UpdateOptions};
pub use self::reconcile::{Reconciler, SyncCounts};
