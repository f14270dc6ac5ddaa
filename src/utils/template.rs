//! String template rendering utilities.

use std::collections::HashMap;

pub struct TemplateVars;

impl TemplateVars {
    pub const APP_NAME: &'static str = "app_name";
    pub const APP_PATH: &'static str = "app_path";
    pub const WORK_DIR: &'static str = "work_dir";
    pub const LIVE_DIR: &'static str = "live_dir";
    pub const DOMAIN: &'static str = "domain";
    pub const RUNTIME_VERSION: &'static str = "runtime_version";
    pub const REPO_URL: &'static str = "repo_url";
    pub const BRANCH: &'static str = "branch";
    pub const TARGET_DIR: &'static str = "target_dir";
    pub const DB_NAME: &'static str = "db_name";
    pub const DB_USER: &'static str = "db_user";
    pub const DB_PASSWORD: &'static str = "db_password";
    pub const SSL_EMAIL: &'static str = "ssl_email";
    pub const RELEASE_ID: &'static str = "release_id";
}

pub fn render(template: &str, variables: &[(&str, &str)]) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

pub fn render_map(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}
