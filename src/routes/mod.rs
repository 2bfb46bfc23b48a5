/// Router Module Index
///
/// Splits the routing table by concern. Neither module applies access control; the
/// API has no authentication layer.

/// Operational endpoints (health). Mounted once, at the root.
pub mod public;

/// The user resource. Mounted at the root and again under `/api`.
pub mod users;
