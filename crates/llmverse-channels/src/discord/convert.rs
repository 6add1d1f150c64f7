use std::sync::LazyLock;

use llmverse_agents::ProviderRegistry;
use regex::Regex;

pub const HISTORY_CLEARED: &str = "🤖 history cleared.";
pub const NO_IMAGE_FOUND: &str = "no image found. only png, jpg, jpeg, gif or webp supported";

const IMAGE_EXTENSIONS: [&str; 5] = [".png", ".jpg", ".jpeg", ".gif", ".webp"];

/// What an incoming message asks the bot to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Not addressed to any known model.
    Ignore,
    Clear,
    Models,
    Prompt { model: String },
}

/// Remove `<...>` markup (mentions, custom emoji) and leading whitespace.
pub fn strip_markup(content: &str) -> String {
    static MARKUP: LazyLock<Regex> =
        LazyLock::new(|| Regex::new("<[^>]+>").expect("markup regex should compile"));

    MARKUP.replace_all(content, "").trim_start().to_string()
}

/// Classify cleaned message text. The model comes from a `name:` prefix,
/// or from the message being replied to when the text has none.
pub fn parse_inbound(content: &str, referenced: Option<&str>, providers: &ProviderRegistry) -> Inbound {
    match content {
        "$clear" => return Inbound::Clear,
        "$models" => return Inbound::Models,
        _ => {}
    }

    providers
        .parse_model_name(content)
        .or_else(|| referenced.and_then(|text| providers.parse_model_name(text)))
        .map_or(Inbound::Ignore, |model| Inbound::Prompt {
            model: model.to_string(),
        })
}

/// URLs of the attachments that look like supported images, given
/// `(filename, url)` pairs.
pub fn image_urls<'a>(attachments: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<String> {
    attachments
        .into_iter()
        .filter(|(filename, _)| {
            let filename = filename.to_ascii_lowercase();
            IMAGE_EXTENSIONS.iter().any(|ext| filename.ends_with(ext))
        })
        .map(|(_, url)| url.to_string())
        .collect()
}

pub fn models_reply(providers: &ProviderRegistry) -> String {
    format!(
        "🤖 available models: {}. begin your question with `model: `",
        providers.available_models()
    )
}

/// Header of the first reply window. Replying to it keeps the model.
pub fn window_header(model: &str) -> String {
    format!("{model}: ")
}

pub fn continuation_header(model: &str) -> String {
    format!("{model}: ⏩ ")
}

pub fn error_reply(model: &str, message: &str) -> String {
    format!("{model}: 🤖 {message}")
}
