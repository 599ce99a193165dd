//! Scripted stand-in for the browser-automation layer

use async_trait::async_trait;
use satfetch::{BrowserSession, OrderStatusSource, Result, WindowHandle};
use std::collections::HashMap;
use std::path::PathBuf;

/// What happens when an order's result button is clicked
#[derive(Clone, Debug)]
pub enum Delivery {
    /// Nothing at all
    Nothing,
    /// The browser saves a file: first as `<name>.part`, then renamed
    File {
        /// Directory the browser saves into
        dir: PathBuf,
        /// Final file name
        name: String,
        /// File bytes
        bytes: Vec<u8>,
    },
    /// The browser opens a new tab showing `text`
    Tab {
        /// Visible body text
        text: String,
        /// Tab URL
        url: String,
    },
}

/// In-memory browser with a window list, scripted deliveries and an order table
#[derive(Debug)]
pub struct FakeBrowser {
    /// Open windows, main window first
    pub handles: Vec<WindowHandle>,
    /// Focused window
    pub active: WindowHandle,
    /// Per-order delivery script
    pub deliveries: HashMap<String, Delivery>,
    /// Order status table
    pub statuses: HashMap<String, String>,
    /// Orders whose action was triggered, in order
    pub triggered: Vec<String>,
    /// Windows that were closed
    pub closed: Vec<WindowHandle>,
    pages: HashMap<WindowHandle, (String, String)>,
    next_tab: usize,
}

impl FakeBrowser {
    /// A browser with only its main window open
    pub fn new() -> Self {
        let main = WindowHandle::new("main");
        Self {
            handles: vec![main.clone()],
            active: main,
            deliveries: HashMap::new(),
            statuses: HashMap::new(),
            triggered: Vec::new(),
            closed: Vec::new(),
            pages: HashMap::new(),
            next_tab: 1,
        }
    }

    /// Script the delivery for `order`
    pub fn deliver(mut self, order: &str, delivery: Delivery) -> Self {
        self.deliveries.insert(order.to_string(), delivery);
        self
    }

    /// Set an order's status
    pub fn status(mut self, order: &str, status: &str) -> Self {
        self.statuses.insert(order.to_string(), status.to_string());
        self
    }

    /// The main window handle
    pub fn main(&self) -> WindowHandle {
        WindowHandle::new("main")
    }
}

impl Default for FakeBrowser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn trigger_action(&mut self, target: &str) -> Result<()> {
        self.triggered.push(target.to_string());
        match self.deliveries.get(target).cloned().unwrap_or(Delivery::Nothing) {
            Delivery::Nothing => {}
            Delivery::File { dir, name, bytes } => {
                let temp = dir.join(format!("{name}.part"));
                std::fs::write(&temp, &bytes)?;
                std::fs::rename(&temp, dir.join(&name))?;
            }
            Delivery::Tab { text, url } => {
                let handle = WindowHandle::new(format!("tab-{}", self.next_tab));
                self.next_tab += 1;
                self.handles.push(handle.clone());
                self.pages.insert(handle, (text, url));
            }
        }
        Ok(())
    }

    async fn current_window_handles(&mut self) -> Result<Vec<WindowHandle>> {
        Ok(self.handles.clone())
    }

    async fn active_window(&mut self) -> Result<WindowHandle> {
        Ok(self.active.clone())
    }

    async fn switch_to_window(&mut self, handle: &WindowHandle) -> Result<()> {
        if !self.handles.contains(handle) {
            return Err(satfetch::Error::Browser(format!("no such window {handle}")));
        }
        self.active = handle.clone();
        Ok(())
    }

    async fn read_active_tab_plain_text(&mut self) -> Result<String> {
        Ok(self
            .pages
            .get(&self.active)
            .map(|(text, _)| text.clone())
            .unwrap_or_default())
    }

    async fn current_url(&mut self) -> Result<String> {
        Ok(self
            .pages
            .get(&self.active)
            .map(|(_, url)| url.clone())
            .unwrap_or_else(|| "https://portal.example/orders".to_string()))
    }

    async fn close_active_window(&mut self) -> Result<()> {
        let closing = self.active.clone();
        self.handles.retain(|h| *h != closing);
        self.closed.push(closing);
        Ok(())
    }
}

#[async_trait]
impl OrderStatusSource for FakeBrowser {
    async fn order_status(&mut self, order_id: &str) -> Result<Option<String>> {
        Ok(self.statuses.get(order_id).cloned())
    }
}
