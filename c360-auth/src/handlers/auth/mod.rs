pub mod magic_link;
pub mod password;
pub mod registration;
pub mod session;

pub use magic_link::{request_magic_link, verify_magic_link};
pub use password::{confirm_password_reset, request_password_reset};
pub use registration::register;
pub use session::{login, logout, logout_all, refresh};
