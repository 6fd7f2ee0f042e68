use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::application::error::HttpError;

/// Render `template` with `status`; a rendering failure becomes a logged 500.
pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match template.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(err) => HttpError::from_error(
            "presentation::views::render_template_response",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Page could not be rendered",
            &err,
        )
        .into_response(),
    }
}

/// Prompt shown in place of a password-protected demo.
#[derive(Template)]
#[template(path = "demo/password.html")]
pub struct PasswordPromptTemplate {
    pub demo_name: String,
    pub action: String,
    pub error: Option<String>,
}

impl PasswordPromptTemplate {
    pub fn new(demo_name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            demo_name: demo_name.into(),
            action: action.into(),
            error: None,
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_escapes_demo_name_and_shows_error() {
        let html = PasswordPromptTemplate::new("<Acme>", "/demos/abc")
            .with_error("Incorrect password")
            .render()
            .expect("rendered");

        assert!(!html.contains("<Acme>"));
        assert!(html.contains("&#60;Acme&#62;"));
        assert!(html.contains(r#"method="post""#));
        assert!(html.contains("Incorrect password"));
    }

    #[test]
    fn prompt_without_error_has_no_alert() {
        let html = PasswordPromptTemplate::new("Launch", "/demos/abc")
            .render()
            .expect("rendered");
        assert!(!html.contains("role=\"alert\""));
    }
}
