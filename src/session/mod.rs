//! Session management on top of the token store.
//!
//! # Architecture
//!
//! - [`SessionService`]: login/logout, profile caching, role queries
//! - [`AuthApi`]: the remote auth endpoints, [`HttpAuthApi`] over `reqwest`
//! - [`UserProfile`]: the authenticated principal

mod api;
mod profile;
mod service;

pub use api::{
    ActionResponse, AuthApi, ChangePasswordRequest, ForgotPasswordRequest, HttpAuthApi,
    LoginRequest, LoginResponse, ResetPasswordRequest, ValidateResetTokenRequest,
};
pub use profile::UserProfile;
pub use service::{CurrentUser, LoginOutcome, ProfileTask, SessionService};
