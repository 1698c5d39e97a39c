use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared-secret cleartext auth. The login user is not checked here; it is the
/// caller identity token, resolved per statement against the user directory.
#[derive(Debug)]
pub struct ShareItAuthSource {
    password: String,
}

impl ShareItAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ShareItAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
