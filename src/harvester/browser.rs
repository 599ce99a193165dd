//! The browser-automation capability the harvester drives

use crate::error::Result;
use crate::types::WindowHandle;
use async_trait::async_trait;

/// Operations the harvester needs from a live browser session
///
/// Implemented by the browser-automation layer (for example a WebDriver
/// client). Failures are reported as [`crate::Error::Browser`].
#[async_trait]
pub trait BrowserSession: Send {
    /// Click or otherwise activate the element that produces the result
    /// listing for `target` (normally an order id)
    async fn trigger_action(&mut self, target: &str) -> Result<()>;

    /// Handles of all open windows and tabs
    async fn current_window_handles(&mut self) -> Result<Vec<WindowHandle>>;

    /// Handle of the window that currently has focus
    async fn active_window(&mut self) -> Result<WindowHandle>;

    /// Move focus to `handle`
    async fn switch_to_window(&mut self, handle: &WindowHandle) -> Result<()>;

    /// Visible text of the focused tab's body
    async fn read_active_tab_plain_text(&mut self) -> Result<String>;

    /// URL of the focused tab
    async fn current_url(&mut self) -> Result<String>;

    /// Close the focused window or tab
    async fn close_active_window(&mut self) -> Result<()>;
}
