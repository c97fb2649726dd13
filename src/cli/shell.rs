//! Shell commands. Each command opens its view through the route guard and checks the role
//! policy before anything is sent.

use chrono::Utc;
use tokio::sync::watch;
use tracing::debug;

use crate::api::{InvoiceFilter, InvoicesApi, ReadingFilter, ReadingsApi};
use crate::error::{AppError, AppResult};
use crate::identity::{AuthSessionManager, LoginForm, RegisterForm, UploadReadingForm};
use crate::model::{MeterType, Role, UserProfile};
use crate::policy::{self, Action};
use crate::routes::{Entry, View, ViewScope, DEFAULT_VIEW, LOGIN_VIEW};

use super::{invoices_table, readings_table, summary_lines};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { email: String, password: String },
    Register(RegisterForm),
    Logout,
    Whoami,
    Status,
    Go(String),
    Readings { all: bool, filter: ReadingFilter },
    Upload(UploadReadingForm),
    Verify(i64),
    Delete(i64),
    Invoices { all: bool, filter: InvoiceFilter },
    Summary,
    Generate(Option<i64>),
    Pay(i64),
    Help,
    Quit,
}

pub const HELP: &str = "Commands:
  login <email> <password>
  register <email> <password> <confirm> \"<full name>\" [resident|manager|admin] [apartment]
  logout                          end the session
  whoami                          show the signed-in user
  status                          session state, API and current view
  go <path>                       open a view (/dashboard, /my-readings, /all-invoices, ...)
  readings [all] [--type water|electricity] [--verified true|false]
  upload <water|electricity> <value> <image>
  verify <reading_id>
  delete <reading_id>
  invoices [all] [--paid true|false] [--user <id>]
  summary                         invoice totals
  generate [user_id]              create invoices for verified readings
  pay <invoice_id>
  help
  quit | exit";

impl Command {
    /// Command word, safe to log (no arguments).
    pub fn name(&self) -> &'static str {
        match self {
            Command::Login { .. } => "login",
            Command::Register(_) => "register",
            Command::Logout => "logout",
            Command::Whoami => "whoami",
            Command::Status => "status",
            Command::Go(_) => "go",
            Command::Readings { .. } => "readings",
            Command::Upload(_) => "upload",
            Command::Verify(_) => "verify",
            Command::Delete(_) => "delete",
            Command::Invoices { .. } => "invoices",
            Command::Summary => "summary",
            Command::Generate(_) => "generate",
            Command::Pay(_) => "pay",
            Command::Help => "help",
            Command::Quit => "quit",
        }
    }

    pub fn parse(line: &str) -> AppResult<Command> {
        let words = split_words(line)?;
        let Some((head, rest)) = words.split_first() else {
            return Err(usage("empty command"));
        };
        let cmd = match head.to_ascii_lowercase().as_str() {
            "login" => match rest {
                [email, password] => Command::Login { email: email.clone(), password: password.clone() },
                _ => return Err(usage("login <email> <password>")),
            },
            "register" => {
                if rest.len() < 4 || rest.len() > 6 {
                    return Err(usage("register <email> <password> <confirm> \"<full name>\" [role] [apartment]"));
                }
                let role = match rest.get(4) {
                    Some(r) => Role::parse(r).ok_or_else(|| usage("role must be resident, manager or admin"))?,
                    None => Role::Resident,
                };
                Command::Register(RegisterForm {
                    email: rest[0].clone(),
                    password: rest[1].clone(),
                    confirm_password: rest[2].clone(),
                    full_name: rest[3].clone(),
                    role,
                    apartment_number: rest.get(5).cloned(),
                })
            }
            "logout" => Command::Logout,
            "whoami" => Command::Whoami,
            "status" => Command::Status,
            "go" => match rest {
                [path] => Command::Go(path.clone()),
                _ => return Err(usage("go <path>")),
            },
            "readings" => {
                let (all, flags) = take_all(rest);
                let mut filter = ReadingFilter::default();
                for (flag, value) in flag_pairs(flags)? {
                    match flag {
                        "--type" => filter.meter_type = Some(parse_meter_type(value)?),
                        "--verified" => filter.verified = Some(parse_bool(value)?),
                        other => return Err(usage(&format!("unknown flag {}", other))),
                    }
                }
                Command::Readings { all, filter }
            }
            "upload" => match rest {
                [kind, value, image] => Command::Upload(UploadReadingForm {
                    meter_type: parse_meter_type(kind)?,
                    reading_value: value.clone(),
                    image: Some(image.into()),
                }),
                _ => return Err(usage("upload <water|electricity> <value> <image>")),
            },
            "verify" => Command::Verify(single_id(rest, "verify <reading_id>")?),
            "delete" => Command::Delete(single_id(rest, "delete <reading_id>")?),
            "invoices" => {
                let (all, flags) = take_all(rest);
                let mut filter = InvoiceFilter::default();
                for (flag, value) in flag_pairs(flags)? {
                    match flag {
                        "--paid" => filter.paid = Some(parse_bool(value)?),
                        "--user" => filter.user_id = Some(parse_id(value)?),
                        other => return Err(usage(&format!("unknown flag {}", other))),
                    }
                }
                Command::Invoices { all, filter }
            }
            "summary" => Command::Summary,
            "generate" => match rest {
                [] => Command::Generate(None),
                [id] => Command::Generate(Some(parse_id(id)?)),
                _ => return Err(usage("generate [user_id]")),
            },
            "pay" => Command::Pay(single_id(rest, "pay <invoice_id>")?),
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(usage(&format!("unknown command '{}'; type help", other))),
        };
        Ok(cmd)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    /// The guard sent the user elsewhere.
    Redirected { to: View, reason: String },
    /// Still restoring the stored session; nothing rendered.
    Pending,
    Quit,
}

impl Reply {
    pub fn render(&self) -> Option<String> {
        match self {
            Reply::Text(t) => Some(t.clone()),
            Reply::Redirected { to, reason } => Some(format!("-> {} ({})", to.path(), reason)),
            Reply::Pending => Some("session is still being restored".to_string()),
            Reply::Quit => None,
        }
    }
}

pub struct Shell {
    manager: AuthSessionManager,
    readings: ReadingsApi,
    invoices: InvoicesApi,
    redirects: watch::Receiver<Option<View>>,
    current: View,
}

impl Shell {
    pub fn new(manager: AuthSessionManager) -> Self {
        let view = manager.view();
        let current = if view.is_authenticated() { DEFAULT_VIEW } else { LOGIN_VIEW };
        let gateway = manager.gateway().clone();
        Shell {
            readings: ReadingsApi::new(gateway.clone()),
            invoices: InvoicesApi::new(gateway),
            redirects: view.redirects(),
            manager,
            current,
        }
    }

    pub fn manager(&self) -> &AuthSessionManager { &self.manager }
    pub fn current_view(&self) -> View { self.current }

    pub fn prompt(&self) -> String {
        match self.manager.view().user() {
            Some(u) => format!("{}@{}> ", u.email, self.current.path()),
            None => format!("{}> ", self.current.path()),
        }
    }

    pub async fn execute(&mut self, cmd: Command) -> AppResult<Reply> {
        debug!(target: "meterbill", "shell command {}", cmd.name());
        let result = self.run(cmd).await;
        // a sign-out forced by the gateway lands here as a redirect to login
        if self.redirects.has_changed().unwrap_or(false) {
            if let Some(target) = *self.redirects.borrow_and_update() {
                self.current = target;
            }
        }
        result
    }

    async fn run(&mut self, cmd: Command) -> AppResult<Reply> {
        match cmd {
            Command::Help => Ok(Reply::Text(HELP.to_string())),
            Command::Quit => Ok(Reply::Quit),
            Command::Status => Ok(Reply::Text(self.status())),
            Command::Whoami => Ok(Reply::Text(match self.manager.view().user() {
                Some(u) => describe_user(&u),
                None => "not signed in".to_string(),
            })),
            Command::Logout => {
                self.manager.logout();
                self.current = LOGIN_VIEW;
                Ok(Reply::Text("signed out".to_string()))
            }
            Command::Login { email, password } => {
                if let Err(r) = self.enter(View::Login) { return Ok(r); }
                let user = self.manager.login(&LoginForm::new(email, password)).await?;
                self.current = DEFAULT_VIEW;
                Ok(Reply::Text(format!("signed in as {} ({})", user.full_name, user.role)))
            }
            Command::Register(form) => {
                if let Err(r) = self.enter(View::Register) { return Ok(r); }
                let user = self.manager.register(&form).await?;
                self.current = DEFAULT_VIEW;
                Ok(Reply::Text(format!("account created; signed in as {} ({})", user.full_name, user.role)))
            }
            Command::Go(path) => {
                let view = View::from_path(&path)
                    .ok_or_else(|| AppError::not_found("unknown_view".to_string(), format!("no view at {}", path)))?;
                self.show(view).await
            }
            Command::Readings { all, filter } => self.list_readings(all, filter).await,
            Command::Invoices { all, filter } => self.list_invoices(all, filter).await,
            Command::Upload(form) => {
                let (scope, user) = match self.open(View::UploadReading) { Ok(v) => v, Err(r) => return Ok(r) };
                permit(&user, Action::UploadReading)?;
                let reading = self.readings.upload(&form).await?;
                let reading = accept(&scope, reading)?;
                Ok(Reply::Text(format!("reading {} uploaded ({} {:.2}), awaiting verification", reading.id, reading.meter_type, reading.reading_value)))
            }
            Command::Verify(id) => {
                let (scope, user) = match self.open(View::AllReadings) { Ok(v) => v, Err(r) => return Ok(r) };
                permit(&user, Action::ViewAllReadings)?;
                let reading = self.readings.get(id).await?;
                permit(&user, Action::VerifyReading(&reading))?;
                let reading = accept(&scope, self.readings.verify(id).await?)?;
                Ok(Reply::Text(format!("reading {} verified", reading.id)))
            }
            Command::Delete(id) => {
                let (scope, user) = match self.open(View::MyReadings) { Ok(v) => v, Err(r) => return Ok(r) };
                let reading = self.readings.get(id).await?;
                permit(&user, Action::DeleteReading(&reading))?;
                self.readings.delete(id).await?;
                accept(&scope, ())?;
                Ok(Reply::Text(format!("reading {} deleted", id)))
            }
            Command::Summary => {
                let (scope, _) = match self.open(View::Dashboard) { Ok(v) => v, Err(r) => return Ok(r) };
                let summary = accept(&scope, self.invoices.summary().await?)?;
                Ok(Reply::Text(summary_lines(&summary)))
            }
            Command::Generate(user_id) => {
                let (scope, user) = match self.open(View::AllInvoices) { Ok(v) => v, Err(r) => return Ok(r) };
                permit(&user, Action::GenerateInvoices)?;
                let created = match user_id {
                    Some(id) => self.invoices.generate_for_user(id).await?,
                    None => self.invoices.generate_all().await?,
                };
                let created = accept(&scope, created)?;
                Ok(Reply::Text(format!("{} invoice(s) generated", created.len())))
            }
            Command::Pay(id) => {
                let (scope, user) = match self.open(View::MyInvoices) { Ok(v) => v, Err(r) => return Ok(r) };
                let invoice = self.invoices.get(id).await?;
                permit(&user, Action::PayInvoice(&invoice))?;
                let invoice = accept(&scope, self.invoices.mark_paid(id).await?)?;
                Ok(Reply::Text(format!("invoice {} paid ({:.2})", invoice.invoice_number, invoice.amount)))
            }
        }
    }

    async fn show(&mut self, view: View) -> AppResult<Reply> {
        match view {
            View::MyReadings => self.list_readings(false, ReadingFilter::default()).await,
            View::AllReadings => self.list_readings(true, ReadingFilter::default()).await,
            View::MyInvoices => self.list_invoices(false, InvoiceFilter::default()).await,
            View::AllInvoices => self.list_invoices(true, InvoiceFilter::default()).await,
            View::Login | View::Register => {
                if let Err(r) = self.enter(view) { return Ok(r); }
                Ok(Reply::Text(if view == View::Login {
                    "login <email> <password>".to_string()
                } else {
                    "register <email> <password> <confirm> \"<full name>\" [role] [apartment]".to_string()
                }))
            }
            View::UploadReading => {
                let (_, user) = match self.open(view) { Ok(v) => v, Err(r) => return Ok(r) };
                permit(&user, Action::UploadReading)?;
                Ok(Reply::Text("upload <water|electricity> <value> <image>".to_string()))
            }
            View::Dashboard => {
                let (_, user) = match self.open(view) { Ok(v) => v, Err(r) => return Ok(r) };
                Ok(Reply::Text(dashboard(&user)))
            }
        }
    }

    async fn list_readings(&mut self, all: bool, filter: ReadingFilter) -> AppResult<Reply> {
        let view = if all { View::AllReadings } else { View::MyReadings };
        let (scope, user) = match self.open(view) { Ok(v) => v, Err(r) => return Ok(r) };
        let list = if all {
            permit(&user, Action::ViewAllReadings)?;
            self.readings.all_readings(&filter).await?
        } else {
            self.readings.my_readings(&filter).await?
        };
        let list = accept(&scope, list)?;
        Ok(Reply::Text(readings_table(&user, &list.readings, list.total, all)))
    }

    async fn list_invoices(&mut self, all: bool, filter: InvoiceFilter) -> AppResult<Reply> {
        let view = if all { View::AllInvoices } else { View::MyInvoices };
        let (scope, user) = match self.open(view) { Ok(v) => v, Err(r) => return Ok(r) };
        let list = if all {
            permit(&user, Action::ViewAllInvoices)?;
            self.invoices.all_invoices(&filter).await?
        } else {
            self.invoices.my_invoices(&filter).await?
        };
        let list = accept(&scope, list)?;
        Ok(Reply::Text(invoices_table(&user, &list.invoices, list.total, Utc::now())))
    }

    /// Route guard step: on success the view becomes current.
    fn enter(&mut self, view: View) -> Result<ViewScope, Reply> {
        match ViewScope::enter(view, &self.manager.view()) {
            Entry::Render(scope) => {
                self.current = view;
                Ok(scope)
            }
            Entry::Pending => Err(Reply::Pending),
            Entry::Redirect(to) => {
                self.current = to;
                let reason = if to == LOGIN_VIEW { "sign in first" } else { "already signed in" };
                Err(Reply::Redirected { to, reason: reason.to_string() })
            }
        }
    }

    /// `enter` for protected views, also yielding the signed-in user.
    fn open(&mut self, view: View) -> Result<(ViewScope, UserProfile), Reply> {
        let scope = self.enter(view)?;
        match self.manager.view().user() {
            Some(user) => Ok((scope, user)),
            None => {
                self.current = LOGIN_VIEW;
                Err(Reply::Redirected { to: LOGIN_VIEW, reason: "sign in first".to_string() })
            }
        }
    }

    fn status(&self) -> String {
        let view = self.manager.view();
        let mut out = format!(
            "state: {}\napi: {}\nview: {}",
            view.state().label(),
            self.manager.gateway().base(),
            self.current.path()
        );
        if let Some(u) = view.user() {
            out.push_str(&format!("\nuser: {} <{}> {}", u.full_name, u.email, u.role));
        }
        out
    }
}

fn permit(user: &UserProfile, action: Action<'_>) -> AppResult<()> {
    if action.permits(user) {
        Ok(())
    } else {
        Err(AppError::forbidden("not_permitted".to_string(), format!("a {} may not {}", user.role, action.name())))
    }
}

fn accept<T>(scope: &ViewScope, value: T) -> AppResult<T> {
    scope
        .accept(value)
        .ok_or_else(|| AppError::conflict("stale_result", "the session changed before the result arrived"))
}

fn describe_user(u: &UserProfile) -> String {
    let mut s = format!("{} <{}>\nrole: {}", u.full_name, u.email, u.role);
    if let Some(apt) = &u.apartment_number {
        s.push_str(&format!("\napartment: {}", apt));
    }
    s
}

fn dashboard(user: &UserProfile) -> String {
    let mut lines = vec![format!("Welcome, {}", user.full_name), describe_user(user), String::new()];
    let offered: [(bool, &str); 5] = [
        (policy::can_upload_reading(user), "upload      submit a meter reading"),
        (true, "readings    your readings"),
        (policy::can_view_all_readings(user), "readings all  review and verify readings"),
        (true, "invoices    your invoices"),
        (policy::can_view_all_invoices(user), "invoices all  all invoices, generate"),
    ];
    lines.extend(offered.iter().filter(|(ok, _)| *ok).map(|(_, l)| format!("  {}", l)));
    lines.join("\n")
}

fn usage(msg: &str) -> AppError { AppError::validation("usage", msg) }

fn take_all(rest: &[String]) -> (bool, &[String]) {
    match rest.first() {
        Some(w) if w.eq_ignore_ascii_case("all") => (true, &rest[1..]),
        _ => (false, rest),
    }
}

fn flag_pairs(words: &[String]) -> AppResult<Vec<(&str, &str)>> {
    if words.len() % 2 != 0 {
        return Err(usage("every flag needs a value"));
    }
    Ok(words.chunks(2).map(|c| (c[0].as_str(), c[1].as_str())).collect())
}

fn parse_meter_type(s: &str) -> AppResult<MeterType> {
    MeterType::parse(s).ok_or_else(|| usage("meter type must be water or electricity"))
}

fn parse_bool(s: &str) -> AppResult<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(usage("expected true or false")),
    }
}

fn parse_id(s: &str) -> AppResult<i64> {
    s.parse::<i64>().map_err(|_| AppError::validation("usage".to_string(), format!("'{}' is not an id", s)))
}

fn single_id(rest: &[String], form: &str) -> AppResult<i64> {
    match rest {
        [id] => parse_id(id),
        _ => Err(usage(form)),
    }
}

/// Whitespace split that keeps double-quoted runs together.
fn split_words(line: &str) -> AppResult<Vec<String>> {
    let mut words = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut started = false;
    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                started = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if started {
                    words.push(std::mem::take(&mut cur));
                    started = false;
                }
            }
            c => {
                cur.push(c);
                started = true;
            }
        }
    }
    if in_quotes {
        return Err(usage("unterminated quote"));
    }
    if started {
        words.push(cur);
    }
    Ok(words)
}
