pub mod base_settings;
pub mod sanitizer;

pub use base_settings::BaseSettings;
pub use sanitizer::SanitizerRules;
