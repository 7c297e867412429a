//! IMAP command handlers for the fake server.
//!
//! Each handler lives in its own module and processes a single IMAP
//! command (APPEND, CAPABILITY, CLOSE, EXAMINE/SELECT, FETCH, LIST,
//! LOGIN, LOGOUT, STATUS).

mod list;

pub use append::{handle_append, parse_append};
pub use capability::handle_capability;
pub use close::handle_close;
pub use fetch::handle_fetch;
pub use list::{handle_list, list_pattern};
pub use login::handle_login;
pub use logout::handle_logout;
pub use select::handle_select;
pub use status::handle_status;
