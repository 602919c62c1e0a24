//! Publish jobs: request validation, sanitising and the data URL codec.

use std::fmt;
use std::sync::LazyLock;

use base64::Engine;
use regex::Regex;
use serde::Deserialize;

/// Telegram caps photo captions at 1024 characters.
pub const MAX_CAPTION_CHARS: usize = 1024;

/// Telegram caps message text at 4096 characters.
pub const MAX_TEXT_CHARS: usize = 4096;

static DATA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:(image/(?:png|jpeg|jpg));base64,(.+)$").expect("data URL pattern")
});

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));

static LINE_BREAKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\r\n]+").expect("newline pattern"));

/// Body of `POST /publish`.
#[derive(Debug, Default, Deserialize)]
pub struct PublishRequest {
    /// `data:image/png;base64,...`
    pub image: Option<String>,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(rename = "chatId")]
    pub chat_id: Option<String>,
}

/// Why a publish request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingContent,
    InvalidImage,
    InvalidChatId(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingContent => {
                write!(f, "Missing publish content. Provide an image (data URL) or text.")
            }
            Self::InvalidImage => {
                write!(f, "Invalid image format. Provide data:image/png|jpeg;base64,...")
            }
            Self::InvalidChatId(id) => {
                write!(f, "Invalid chatId '{id}'. Use @channelusername or a numeric chat id.")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Decoded image from a data URL.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImagePayload {
    /// Parse `data:image/(png|jpeg|jpg);base64,<payload>`.
    pub fn from_data_url(input: &str) -> Result<Self, ValidationError> {
        let caps = DATA_URL.captures(input).ok_or(ValidationError::InvalidImage)?;
        let mime = caps[1].to_string();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&caps[2])
            .map_err(|_| ValidationError::InvalidImage)?;
        if bytes.is_empty() {
            return Err(ValidationError::InvalidImage);
        }
        Ok(Self { mime, bytes })
    }

    /// Re-encode for relays that expect the data URL form.
    pub fn to_data_url(&self) -> String {
        let b64 = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{}", self.mime, b64)
    }

    pub fn file_name(&self) -> &'static str {
        if self.mime == "image/png" {
            "template.png"
        } else {
            "template.jpg"
        }
    }
}

/// Where a job is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    Id(i64),
    /// Channel username including the leading `@`.
    Username(String),
}

impl ChatTarget {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if let Some(name) = trimmed.strip_prefix('@') {
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Ok(Self::Username(trimmed.to_string()));
            }
        } else if let Ok(id) = trimmed.parse::<i64>() {
            return Ok(Self::Id(id));
        }
        Err(ValidationError::InvalidChatId(input.to_string()))
    }
}

impl fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Username(name) => f.write_str(name),
        }
    }
}

/// A validated unit of work for the publish queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishJob {
    pub image: Option<ImagePayload>,
    pub text: Option<String>,
    /// Already stripped and capped; may be empty.
    pub caption: String,
    /// Overrides the configured default chat.
    pub chat_id: Option<ChatTarget>,
}

impl PublishJob {
    /// Validate a request body. Checks run in a fixed order: content, image, chat.
    pub fn from_request(req: PublishRequest) -> Result<Self, ValidationError> {
        let image = req.image.filter(|s| !s.is_empty());
        let text = req
            .text
            .map(|t| strip_to_text(&t, MAX_TEXT_CHARS))
            .filter(|t| !t.is_empty());

        if image.is_none() && text.is_none() {
            return Err(ValidationError::MissingContent);
        }

        let image = image.as_deref().map(ImagePayload::from_data_url).transpose()?;

        let chat_id = req
            .chat_id
            .filter(|s| !s.trim().is_empty())
            .map(|s| ChatTarget::parse(&s))
            .transpose()?;

        Ok(Self {
            image,
            text,
            caption: strip_to_text(req.caption.as_deref().unwrap_or(""), MAX_CAPTION_CHARS),
            chat_id,
        })
    }

    pub fn kind(&self) -> &'static str {
        if self.image.is_some() { "photo" } else { "text" }
    }

    /// Text for a text-only send. Falls back to the caption.
    pub fn message_text(&self) -> &str {
        match &self.text {
            Some(t) => t,
            None => &self.caption,
        }
    }
}

/// Strip tags, fold line breaks into spaces, trim and cap at `max_chars`.
pub fn strip_to_text(input: &str, max_chars: usize) -> String {
    let no_tags = HTML_TAG.replace_all(input, "");
    let one_line = LINE_BREAKS.replace_all(&no_tags, " ");
    one_line.trim().chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_URL: &str = "data:image/png;base64,cG5n";

    fn request(image: Option<&str>, text: Option<&str>, caption: Option<&str>) -> PublishRequest {
        PublishRequest {
            image: image.map(String::from),
            text: text.map(String::from),
            caption: caption.map(String::from),
            chat_id: None,
        }
    }

    #[test]
    fn test_caption_only_is_missing_content() {
        let err = PublishJob::from_request(request(None, None, Some("hello"))).unwrap_err();
        assert_eq!(err, ValidationError::MissingContent);
        assert!(err.to_string().starts_with("Missing publish content"));
    }

    #[test]
    fn test_blank_text_is_missing_content() {
        let err = PublishJob::from_request(request(None, Some("  <br>\n "), None)).unwrap_err();
        assert_eq!(err, ValidationError::MissingContent);
    }

    #[test]
    fn test_rejects_malformed_data_urls() {
        for bad in [
            "data:bad,notbase64",
            "data:image/gif;base64,R0lGOD",
            "data:image/png;base64,",
            "data:image/png;base64,@@@not-base64@@@",
            "https://example.com/a.png",
        ] {
            let err = PublishJob::from_request(request(Some(bad), None, None)).unwrap_err();
            assert_eq!(err, ValidationError::InvalidImage, "accepted {bad}");
        }
    }

    #[test]
    fn test_decodes_image() {
        let job = PublishJob::from_request(request(Some(PNG_URL), None, Some("<b>hi</b>"))).unwrap();
        let image = job.image.as_ref().unwrap();
        assert_eq!(image.mime, "image/png");
        assert_eq!(image.bytes, b"png");
        assert_eq!(image.file_name(), "template.png");
        assert_eq!(job.caption, "hi");
        assert_eq!(job.kind(), "photo");
    }

    #[test]
    fn test_jpeg_file_name() {
        let image = ImagePayload::from_data_url("data:image/jpeg;base64,anBn").unwrap();
        assert_eq!(image.file_name(), "template.jpg");
        assert_eq!(image.to_data_url(), "data:image/jpeg;base64,anBn");
    }

    #[test]
    fn test_text_only_job() {
        let job = PublishJob::from_request(request(None, Some("1,2,3,4,5"), None)).unwrap();
        assert_eq!(job.text.as_deref(), Some("1,2,3,4,5"));
        assert_eq!(job.message_text(), "1,2,3,4,5");
        assert_eq!(job.kind(), "text");
    }

    #[test]
    fn test_chat_override() {
        let mut req = request(None, Some("hello"), None);
        req.chat_id = Some("@newaithinesh".to_string());
        let job = PublishJob::from_request(req).unwrap();
        assert_eq!(job.chat_id, Some(ChatTarget::Username("@newaithinesh".to_string())));
    }

    #[test]
    fn test_invalid_chat_override() {
        let mut req = request(None, Some("hello"), None);
        req.chat_id = Some("not a chat".to_string());
        let err = PublishJob::from_request(req).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidChatId(_)));
    }

    #[test]
    fn test_chat_target_parse() {
        assert_eq!(ChatTarget::parse("-1001234567890").unwrap(), ChatTarget::Id(-1001234567890));
        assert_eq!(ChatTarget::parse(" @news_tn ").unwrap(), ChatTarget::Username("@news_tn".into()));
        assert!(ChatTarget::parse("@").is_err());
        assert!(ChatTarget::parse("@bad-name").is_err());
        assert_eq!(ChatTarget::Id(42).to_string(), "42");
    }

    #[test]
    fn test_strip_to_text() {
        assert_eq!(strip_to_text("<p>Breaking</p>\r\n<i>news</i>", 100), "Breaking news");
        assert_eq!(strip_to_text("  padded  ", 100), "padded");
        // Caps by characters, not bytes
        assert_eq!(strip_to_text("தமிழ் செய்தி", 3).chars().count(), 3);
    }

    #[test]
    fn test_caption_capped() {
        let long = "x".repeat(2000);
        let job = PublishJob::from_request(request(Some(PNG_URL), None, Some(&long))).unwrap();
        assert_eq!(job.caption.chars().count(), MAX_CAPTION_CHARS);
    }

    #[test]
    fn test_debug_hides_image_bytes() {
        let image = ImagePayload::from_data_url(PNG_URL).unwrap();
        assert_eq!(format!("{image:?}"), r#"ImagePayload { mime: "image/png", len: 3 }"#);
    }
}
