//! Scripted [`Window`] double.

use ember_platform::{ResizeCallback, Window};

/// A window whose size and close state are driven by the test.
///
/// Resizes go through the registered callback just like real resize
/// events. A minimized window can be given a size to restore to the next
/// time the renderer blocks in [`Window::wait_while_minimized`].
pub struct MockWindow {
    size: (u32, u32),
    closing: bool,
    callback: Option<ResizeCallback>,
    restore_size: Option<(u32, u32)>,
    close_after_polls: Option<u32>,
    polls: u32,
    minimized_waits: u32,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            closing: false,
            callback: None,
            restore_size: None,
            close_after_polls: None,
            polls: 0,
            minimized_waits: 0,
        }
    }

    /// Change the drawable size and fire the resize callback.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        if let Some(callback) = self.callback.as_mut() {
            callback(width, height);
        }
    }

    /// Minimize; the next blocking wait restores `restore_to`, or keeps the
    /// window minimized when `None`.
    pub fn minimize(&mut self, restore_to: Option<(u32, u32)>) {
        self.resize(0, 0);
        self.restore_size = restore_to;
    }

    pub fn close(&mut self) {
        self.closing = true;
    }

    /// Request close once `poll_events` has run `polls` times.
    pub fn close_after_polls(&mut self, polls: u32) {
        self.close_after_polls = Some(polls);
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Number of times the renderer blocked on a minimized window.
    pub fn minimized_waits(&self) -> u32 {
        self.minimized_waits
    }
}

impl Window for MockWindow {
    fn drawable_size(&self) -> (u32, u32) {
        self.size
    }

    fn is_closing(&self) -> bool {
        self.closing
    }

    fn poll_events(&mut self) {
        self.polls += 1;
        if self.close_after_polls.is_some_and(|n| self.polls >= n) {
            self.closing = true;
        }
    }

    fn wait_while_minimized(&mut self) {
        if !self.is_minimized() || self.closing {
            return;
        }
        self.minimized_waits += 1;
        match self.restore_size.take() {
            Some((width, height)) => self.resize(width, height),
            // A real window would block until restored or closed.
            None => self.closing = true,
        }
    }

    fn set_resize_callback(&mut self, callback: ResizeCallback) {
        self.callback = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn resize_fires_callback() {
        let seen = Rc::new(Cell::new((0, 0)));
        let mut window = MockWindow::new(800, 600);
        let sink = Rc::clone(&seen);
        window.set_resize_callback(Box::new(move |w, h| sink.set((w, h))));

        window.resize(640, 480);
        assert_eq!(seen.get(), (640, 480));
        assert_eq!(window.drawable_size(), (640, 480));
    }

    #[test]
    fn minimized_wait_restores_or_closes() {
        let mut window = MockWindow::new(800, 600);
        window.minimize(Some((320, 200)));
        assert!(window.is_minimized());
        window.wait_while_minimized();
        assert_eq!(window.drawable_size(), (320, 200));
        assert!(!window.is_closing());

        window.minimize(None);
        window.wait_while_minimized();
        assert!(window.is_minimized());
        assert!(window.is_closing());
        assert_eq!(window.minimized_waits(), 2);
    }

    #[test]
    fn closes_after_polls() {
        let mut window = MockWindow::new(1, 1);
        window.close_after_polls(2);
        window.poll_events();
        assert!(!window.is_closing());
        window.poll_events();
        assert!(window.is_closing());
    }
}
