use crate::constants::*;

pub fn validate_group_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Group name is required".into());
    }
    if trimmed.chars().count() > MAX_GROUP_NAME_LENGTH {
        return Err(format!(
            "Group name must be at most {} characters",
            MAX_GROUP_NAME_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_message_content(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("Message content is required".into());
    }
    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err("Message too long".into());
    }
    Ok(())
}

/// Captions on media messages may be empty but share the length cap.
pub fn validate_caption(content: &str) -> Result<(), String> {
    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err("Message too long".into());
    }
    Ok(())
}

pub fn validate_handle(handle: &str) -> Result<(), String> {
    if handle.len() < MIN_HANDLE_LENGTH {
        return Err(format!(
            "Handle must be at least {} characters",
            MIN_HANDLE_LENGTH
        ));
    }
    if handle.len() > MAX_HANDLE_LENGTH {
        return Err(format!(
            "Handle must be at most {} characters",
            MAX_HANDLE_LENGTH
        ));
    }
    if !handle
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(
            "Handle can only contain letters, numbers, hyphens, and underscores".into(),
        );
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_emoji(emoji: &str) -> Result<(), String> {
    let trimmed = emoji.trim();
    if trimmed.is_empty() {
        return Err("Emoji is required".into());
    }
    if trimmed.len() > MAX_EMOJI_LENGTH || trimmed.chars().any(char::is_whitespace) {
        return Err("Invalid emoji".into());
    }
    Ok(())
}

/// Cut `name` to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate_name(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }
    let kept: String = name.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}
