use secrecy::SecretString;

#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub idp_url: String,
    pub app_url: String,
    pub session_token: Option<SecretString>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(idp_url: String, app_url: String) -> Self {
        Self {
            idp_url,
            app_url,
            session_token: None,
        }
    }

    pub fn set_session_token(&mut self, token: SecretString) {
        self.session_token = Some(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let mut args = GlobalArgs::new(
            "https://idp.sting.dev".to_string(),
            "https://app.sting.dev".to_string(),
        );
        assert_eq!(args.idp_url, "https://idp.sting.dev");
        assert!(args.session_token.is_none());

        args.set_session_token(SecretString::from("token".to_string()));
        assert_eq!(
            args.session_token
                .as_ref()
                .map(ExposeSecret::expose_secret),
            Some("token")
        );
    }
}
