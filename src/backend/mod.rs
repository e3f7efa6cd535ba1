//! Backend web application.
//!
//! # Routes
//! ```text
//! GET  /login.html        login form
//! POST /login             check credentials → index page + SID cookie | 401
//! GET  / , /index.html    index page for a valid session | 401
//! POST /echo              echo the request body
//! POST /logout            revoke the session, clear the cookie
//! ```

pub mod app;
pub mod pages;

pub use app::BackendApp;
