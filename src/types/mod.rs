// ABOUTME: Validated domain types shared across layers.
// ABOUTME: Currently the application name that every unit and lock is keyed on.

mod app_name;

pub use app_name::{AppName, AppNameError, MAX_APP_NAME_LEN};
