//! Views and the guard that decides whether one may render.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::identity::{SessionState, SessionView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    Login,
    Register,
    Dashboard,
    UploadReading,
    MyReadings,
    AllReadings,
    MyInvoices,
    AllInvoices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    PublicOnly,
    ProtectedOnly,
}

/// Where signed-in users land.
pub const DEFAULT_VIEW: View = View::Dashboard;
pub const LOGIN_VIEW: View = View::Login;

impl View {
    pub const ALL: [View; 8] = [
        View::Login,
        View::Register,
        View::Dashboard,
        View::UploadReading,
        View::MyReadings,
        View::AllReadings,
        View::MyInvoices,
        View::AllInvoices,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            View::Login => "/login",
            View::Register => "/register",
            View::Dashboard => "/dashboard",
            View::UploadReading => "/upload-reading",
            View::MyReadings => "/my-readings",
            View::AllReadings => "/all-readings",
            View::MyInvoices => "/my-invoices",
            View::AllInvoices => "/all-invoices",
        }
    }

    /// Resolve a path; `/` is the default view, unknown paths resolve to nothing.
    pub fn from_path(path: &str) -> Option<View> {
        let p = path.trim();
        let p = p.split(['?', '#']).next().unwrap_or("");
        let p = p.trim_end_matches('/');
        if p.is_empty() {
            return Some(DEFAULT_VIEW);
        }
        let p = if p.starts_with('/') { p.to_string() } else { format!("/{}", p) };
        View::ALL.iter().copied().find(|v| v.path() == p)
    }

    pub fn access(&self) -> Access {
        match self {
            View::Login | View::Register => Access::PublicOnly,
            _ => Access::ProtectedOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    /// Session still being restored: render nothing yet, and do not redirect.
    Pending,
    RedirectTo(View),
}

pub fn can_enter(view: View, state: &SessionState) -> RouteDecision {
    match (state, view.access()) {
        (SessionState::Restoring, _) => RouteDecision::Pending,
        (SessionState::Authenticated(_), Access::PublicOnly) => RouteDecision::RedirectTo(DEFAULT_VIEW),
        (SessionState::Unauthenticated, Access::ProtectedOnly) => RouteDecision::RedirectTo(LOGIN_VIEW),
        _ => RouteDecision::Allow,
    }
}

/// Outcome of trying to open a view.
pub enum Entry {
    Render(ViewScope),
    Pending,
    Redirect(View),
}

/// Lifetime of a rendered view. Results that arrive after the view closed, or after the
/// session changed underneath it, are dropped instead of applied.
pub struct ViewScope {
    view: View,
    session: SessionView,
    generation: u64,
    open: Arc<AtomicBool>,
}

impl ViewScope {
    pub fn enter(view: View, session: &SessionView) -> Entry {
        // generation first: a sign-out racing this call then shows up as a stale scope
        let generation = session.generation();
        match can_enter(view, &session.state()) {
            RouteDecision::Allow => Entry::Render(ViewScope {
                view,
                session: session.clone(),
                generation,
                open: Arc::new(AtomicBool::new(true)),
            }),
            RouteDecision::Pending => Entry::Pending,
            RouteDecision::RedirectTo(target) => Entry::Redirect(target),
        }
    }

    pub fn view(&self) -> View { self.view }

    pub fn is_current(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.session.generation() == self.generation
    }

    pub fn accept<T>(&self, result: T) -> Option<T> {
        if self.is_current() { Some(result) } else { None }
    }

    pub fn close(&self) { self.open.store(false, Ordering::SeqCst); }

    /// Detached handle that closes this scope from elsewhere.
    pub fn closer(&self) -> Arc<AtomicBool> { self.open.clone() }
}

impl Drop for ViewScope {
    fn drop(&mut self) { self.close(); }
}
