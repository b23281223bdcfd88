//! Template rendering for campaign messages.
//!
//! Both templates are compiled once, before the campaign starts, so a
//! syntax error never surfaces halfway through a send. The HTML template is
//! auto-escaped, the text template is not.

use courier_smtp::Mailbox;
use minijinja::{Environment, UndefinedBehavior};
use serde_json::{Map, Value};

use crate::{
    config::CampaignConfig,
    context::build_context,
    error::{ConfigError, RenderError},
    message::RenderedMessage,
    recipient::RecipientRecord,
};

const TEXT_TEMPLATE: &str = "message.txt";
const HTML_TEMPLATE: &str = "message.html";

/// Turns recipients into [`RenderedMessage`]s.
pub struct Renderer {
    env: Environment<'static>,
    params: Map<String, Value>,
    from: Mailbox,
    subject: String,
    mailer: String,
}

impl Renderer {
    /// Compile the campaign's templates.
    ///
    /// # Errors
    ///
    /// Returns an error if either template fails to parse.
    pub fn new(config: &CampaignConfig) -> Result<Self, ConfigError> {
        let mut env = Environment::new();
        if config.strict_templates {
            env.set_undefined_behavior(UndefinedBehavior::Strict);
        }

        env.add_template_owned(TEXT_TEMPLATE, config.text_template.clone())
            .map_err(|source| ConfigError::Template {
                name: "text",
                source,
            })?;
        env.add_template_owned(HTML_TEMPLATE, config.html_template.clone())
            .map_err(|source| ConfigError::Template {
                name: "HTML",
                source,
            })?;

        Ok(Self {
            env,
            params: config.params.clone(),
            from: Mailbox::with_name(config.sender.name.clone(), config.sender.email.clone()),
            subject: config.subject.clone(),
            mailer: config.mailer.clone(),
        })
    }

    /// Render both bodies for the recipient at `position`.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient can't be turned into a context, or
    /// either template fails to render it.
    pub fn render(
        &self,
        position: usize,
        recipient: &RecipientRecord,
    ) -> Result<RenderedMessage, RenderError> {
        let context =
            build_context(recipient, &self.params).map_err(|source| RenderError::Context {
                position,
                email: recipient.email.clone(),
                source,
            })?;

        let render = |name: &'static str| {
            self.env
                .get_template(name)
                .and_then(|template| template.render(&context))
                .map_err(|source| RenderError::Template {
                    template: name,
                    position,
                    email: recipient.email.clone(),
                    source,
                })
        };

        Ok(RenderedMessage {
            to: Mailbox::with_name(recipient.name.clone(), recipient.email.clone()),
            from: self.from.clone(),
            subject: self.subject.clone(),
            text: render(TEXT_TEMPLATE)?,
            html: render(HTML_TEMPLATE)?,
            mailer: self.mailer.clone(),
        })
    }
}
