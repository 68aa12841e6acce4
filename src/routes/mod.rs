/// Router Module Index
///
/// Organizes the routing logic into access-segregated modules. Access control is
/// applied at the module level (via Axum layers in `create_router`), so a route's
/// protection follows from the module it is registered in.

/// Routes accessible to anonymous clients.
pub mod public;

/// Routes protected by the `AuthUser` route layer.
pub mod authenticated;

/// Routes that additionally require the "admin" role.
pub mod admin;
