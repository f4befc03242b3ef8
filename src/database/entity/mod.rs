pub mod app_settings;
pub mod server_profile;

pub mod prelude {
    pub use super::app_settings::Entity as AppSettings;
    pub use super::server_profile::Entity as ServerProfiles;
}
