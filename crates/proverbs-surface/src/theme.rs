//! Page theme color.

use tokio::sync::watch;
use tracing::info;

use proverbs_core::error::{ProverbsError, Result};

/// The page's theme color. Readers take the current value on every render;
/// `changed()` lets a live view redraw.
pub struct Theme {
    tx: watch::Sender<String>,
}

impl Theme {
    pub fn new(color: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(color.into());
        Self { tx }
    }

    pub fn color(&self) -> String {
        self.tx.borrow().clone()
    }

    /// Replace the color. Only a single CSS color value is accepted.
    pub fn set(&self, color: &str) -> Result<()> {
        let color = color.trim();
        if color.is_empty() {
            return Err(ProverbsError::Action("theme color must not be empty".into()));
        }
        if !is_css_color(color) {
            return Err(ProverbsError::Action(format!("'{color}' is not a CSS color")));
        }
        info!(color, "Theme color changed");
        self.tx.send_replace(color.to_string());
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

/// A hex color, a named color, or an `rgb()`/`rgba()`/`hsl()`/`hsla()` call.
pub fn is_css_color(value: &str) -> bool {
    if let Some(hex) = value.strip_prefix('#') {
        return matches!(hex.len(), 3 | 4 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    if value.chars().all(|c| c.is_ascii_alphabetic()) {
        return true;
    }

    let lower = value.to_ascii_lowercase();
    let Some((func, rest)) = lower.split_once('(') else {
        return false;
    };
    let Some(args) = rest.strip_suffix(')') else {
        return false;
    };
    matches!(func, "rgb" | "rgba" | "hsl" | "hsla")
        && !args.trim().is_empty()
        && args
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '.' | ',' | '%' | '/' | '-' | 'd' | 'e' | 'g'))
}
