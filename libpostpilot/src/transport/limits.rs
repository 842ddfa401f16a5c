//! Per-platform content constraints

use crate::error::TransportError;
use crate::transport::PublishItem;
use crate::types::Platform;

/// Delivery constraints for one platform.
#[derive(Debug, Clone, Copy)]
pub struct PlatformLimits {
    /// Maximum body length in characters.
    pub char_cap: usize,
    /// Whether a post without media is rejected outright.
    pub requires_media: bool,
}

pub fn for_platform(platform: Platform) -> PlatformLimits {
    match platform {
        Platform::X => PlatformLimits {
            char_cap: 280,
            requires_media: false,
        },
        Platform::Instagram => PlatformLimits {
            char_cap: 2200,
            requires_media: true,
        },
        Platform::LinkedIn => PlatformLimits {
            char_cap: 3000,
            requires_media: false,
        },
        Platform::TikTok => PlatformLimits {
            char_cap: 2200,
            requires_media: true,
        },
        Platform::Facebook => PlatformLimits {
            char_cap: 63_206,
            requires_media: false,
        },
        Platform::Telegram => PlatformLimits {
            char_cap: 4096,
            requires_media: false,
        },
    }
}

/// Check an item against its platform's constraints. The body length is
/// counted in characters, not bytes.
pub fn validate(item: &PublishItem) -> Result<(), TransportError> {
    let limits = for_platform(item.platform);

    let length = item.body.chars().count();
    if length > limits.char_cap {
        return Err(TransportError::Validation(format!(
            "content length {} exceeds {}'s {} character cap",
            length, item.platform, limits.char_cap
        )));
    }

    if limits.requires_media && item.media_ref.is_none() {
        return Err(TransportError::Validation(format!(
            "{} requires a media attachment",
            item.platform
        )));
    }

    Ok(())
}
