//! In-process billing API for integration tests: an axum router on 127.0.0.1:0 with
//! seeded users, bearer tokens and just enough reading/invoice behaviour.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use meterbill::config::ClientConfig;
use meterbill::model::UserProfile;

pub const RESIDENT: (&str, &str) = ("ria@example.org", "hunter22");
pub const MANAGER: (&str, &str) = ("max@example.org", "manager1");
pub const ADMIN: (&str, &str) = ("ada@example.org", "admin123");

type ApiReply = Result<Json<Value>, (StatusCode, Json<Value>)>;
type Shared = State<Arc<MockApi>>;

fn fail(status: StatusCode, detail: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "detail": detail })))
}

struct MockUser {
    password: String,
    profile: Value,
}

pub struct MockApi {
    users: Mutex<Vec<MockUser>>,
    tokens: Mutex<HashMap<String, i64>>,
    readings: Mutex<Vec<Value>>,
    invoices: Mutex<Vec<Value>>,
    hits: Mutex<Vec<String>>,
    login_delay: Mutex<Duration>,
    reject_logins: AtomicBool,
    next_id: AtomicI64,
}

fn user_json(id: i64, email: &str, name: &str, role: &str, apartment: Option<&str>) -> Value {
    json!({
        "id": id, "email": email, "full_name": name, "role": role,
        "apartment_number": apartment, "is_active": true, "created_at": "2024-01-15T08:00:00"
    })
}

impl MockApi {
    fn seeded() -> Self {
        let users = vec![
            MockUser { password: RESIDENT.1.into(), profile: user_json(1, RESIDENT.0, "Ria Resident", "resident", Some("4B")) },
            MockUser { password: MANAGER.1.into(), profile: user_json(2, MANAGER.0, "Max Manager", "manager", None) },
            MockUser { password: ADMIN.1.into(), profile: user_json(3, ADMIN.0, "Ada Admin", "admin", None) },
        ];
        MockApi {
            users: Mutex::new(users),
            tokens: Mutex::new(HashMap::new()),
            readings: Mutex::new(Vec::new()),
            invoices: Mutex::new(Vec::new()),
            hits: Mutex::new(Vec::new()),
            login_delay: Mutex::new(Duration::ZERO),
            reject_logins: AtomicBool::new(false),
            next_id: AtomicI64::new(100),
        }
    }

    fn hit(&self, what: &str) { self.hits.lock().push(what.to_string()); }
    fn next(&self) -> i64 { self.next_id.fetch_add(1, Ordering::SeqCst) }

    pub fn hits(&self) -> Vec<String> { self.hits.lock().clone() }
    pub fn count(&self, what: &str) -> usize { self.hits.lock().iter().filter(|h| h.as_str() == what).count() }

    pub fn issue_token(&self, user_id: i64) -> String {
        let token = format!("tok-{}-{}", user_id, self.next());
        self.tokens.lock().insert(token.clone(), user_id);
        token
    }

    pub fn revoke_all(&self) { self.tokens.lock().clear(); }
    pub fn set_login_delay(&self, d: Duration) { *self.login_delay.lock() = d; }
    pub fn reject_logins(&self, on: bool) { self.reject_logins.store(on, Ordering::SeqCst); }

    pub fn profile(&self, id: i64) -> Option<Value> {
        self.users.lock().iter().find(|u| u.profile["id"] == id).map(|u| u.profile.clone())
    }

    pub fn user_profile(&self, id: i64) -> UserProfile {
        serde_json::from_value(self.profile(id).expect("seeded user")).expect("profile json")
    }

    pub fn add_reading(&self, user_id: i64, meter_type: &str, value: f64, verified: bool) -> i64 {
        let id = self.next();
        self.readings.lock().push(json!({
            "id": id, "user_id": user_id, "meter_type": meter_type, "reading_value": value,
            "image_url": format!("/uploads/{}.jpg", id), "reading_date": "2024-06-02T10:00:00",
            "verified": verified, "verified_by": null, "verified_at": null
        }));
        id
    }

    pub fn add_invoice(&self, user_id: i64, amount: f64, paid: bool, due_date: &str) -> i64 {
        let id = self.next();
        self.invoices.lock().push(json!({
            "id": id, "user_id": user_id, "meter_reading_id": 0, "invoice_number": format!("INV-{:05}", id),
            "amount": amount, "consumption": amount, "rate": 1.0, "issue_date": "2024-06-01T00:00:00",
            "due_date": due_date, "paid": paid, "paid_at": null
        }));
        id
    }

    pub fn invoice_ids(&self) -> Vec<i64> {
        self.invoices.lock().iter().filter_map(|i| i["id"].as_i64()).collect()
    }

    fn caller(&self, headers: &HeaderMap) -> Result<Value, (StatusCode, Json<Value>)> {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| fail(StatusCode::UNAUTHORIZED, "Not authenticated"))?;
        let id = self
            .tokens
            .lock()
            .get(token)
            .copied()
            .ok_or_else(|| fail(StatusCode::UNAUTHORIZED, "Could not validate credentials"))?;
        self.profile(id).ok_or_else(|| fail(StatusCode::UNAUTHORIZED, "Could not validate credentials"))
    }

    fn invoice_for(&self, reading: &Value) -> Value {
        let id = self.next();
        let value = reading["reading_value"].as_f64().unwrap_or_default();
        let rate = if reading["meter_type"] == "water" { 2.5 } else { 0.15 };
        json!({
            "id": id, "user_id": reading["user_id"], "meter_reading_id": reading["id"],
            "invoice_number": format!("INV-{:05}", id), "amount": value * rate, "consumption": value,
            "rate": rate, "issue_date": "2024-06-03T00:00:00", "due_date": "2099-07-03T00:00:00",
            "paid": false, "paid_at": null
        })
    }

    fn generate(&self, only_user: Option<i64>) -> Vec<Value> {
        let readings = self.readings.lock().clone();
        let mut invoices = self.invoices.lock();
        let mut created = Vec::new();
        for r in readings.iter().filter(|r| r["verified"] == true) {
            if only_user.is_some_and(|u| r["user_id"] != u) { continue; }
            if invoices.iter().any(|i| i["meter_reading_id"] == r["id"]) { continue; }
            let inv = self.invoice_for(r);
            invoices.push(inv.clone());
            created.push(inv);
        }
        created
    }
}

fn is_staff(user: &Value) -> bool { matches!(user["role"].as_str(), Some("manager") | Some("admin")) }
fn is_admin(user: &Value) -> bool { user["role"] == "admin" }

fn flag(q: &HashMap<String, String>, key: &str) -> Option<bool> { q.get(key).and_then(|v| v.parse().ok()) }

async fn login(State(st): Shared, Json(body): Json<Value>) -> ApiReply {
    st.hit("POST /auth/login");
    let delay = *st.login_delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    if st.reject_logins.load(Ordering::SeqCst) {
        return Err(fail(StatusCode::UNAUTHORIZED, "Incorrect email or password"));
    }
    let email = body["email"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();
    let found = st
        .users
        .lock()
        .iter()
        .find(|u| u.profile["email"] == email && u.password == password)
        .map(|u| u.profile.clone());
    let profile = found.ok_or_else(|| fail(StatusCode::UNAUTHORIZED, "Incorrect email or password"))?;
    let token = st.issue_token(profile["id"].as_i64().unwrap_or_default());
    Ok(Json(json!({ "access_token": token, "token_type": "bearer", "user": profile })))
}

async fn register(State(st): Shared, Json(body): Json<Value>) -> ApiReply {
    st.hit("POST /auth/register");
    let email = body["email"].as_str().unwrap_or_default().to_string();
    if st.users.lock().iter().any(|u| u.profile["email"] == email.as_str()) {
        return Err(fail(StatusCode::BAD_REQUEST, "Email already registered"));
    }
    let id = st.next();
    let profile = json!({
        "id": id, "email": email, "full_name": body["full_name"], "role": body["role"],
        "apartment_number": body.get("apartment_number").cloned().unwrap_or(Value::Null),
        "is_active": true, "created_at": "2024-06-01T09:00:00"
    });
    let password = body["password"].as_str().unwrap_or_default().to_string();
    st.users.lock().push(MockUser { password, profile: profile.clone() });
    Ok(Json(profile))
}

async fn me(State(st): Shared, headers: HeaderMap) -> ApiReply {
    st.hit("GET /auth/me");
    Ok(Json(st.caller(&headers)?))
}

async fn upload(State(st): Shared, headers: HeaderMap, mut form: Multipart) -> ApiReply {
    st.hit("POST /meter-readings/upload");
    let user = st.caller(&headers)?;
    let (mut meter_type, mut value, mut image_len) = (None, None, 0usize);
    while let Ok(Some(field)) = form.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(|_| fail(StatusCode::BAD_REQUEST, "bad multipart body"))?;
        match name.as_str() {
            "meter_type" => meter_type = Some(String::from_utf8_lossy(&data).to_string()),
            "reading_value" => value = String::from_utf8_lossy(&data).parse::<f64>().ok(),
            "image" => image_len = data.len(),
            _ => {}
        }
    }
    let (Some(meter_type), Some(value)) = (meter_type, value) else {
        return Err(fail(StatusCode::UNPROCESSABLE_ENTITY, "field required"));
    };
    if image_len == 0 {
        return Err(fail(StatusCode::BAD_REQUEST, "No file uploaded"));
    }
    let id = st.add_reading(user["id"].as_i64().unwrap_or_default(), &meter_type, value, false);
    let reading = st.readings.lock().iter().find(|r| r["id"] == id).cloned().unwrap_or(Value::Null);
    Ok(Json(reading))
}

async fn my_readings(State(st): Shared, headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> ApiReply {
    st.hit("GET /meter-readings/my-readings");
    let user = st.caller(&headers)?;
    let list: Vec<Value> = st
        .readings
        .lock()
        .iter()
        .filter(|r| r["user_id"] == user["id"])
        .filter(|r| q.get("meter_type").map_or(true, |t| r["meter_type"] == t.as_str()))
        .cloned()
        .collect();
    Ok(Json(json!({ "total": list.len(), "readings": list })))
}

async fn all_readings(State(st): Shared, headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> ApiReply {
    st.hit("GET /meter-readings/all");
    let user = st.caller(&headers)?;
    if !is_staff(&user) {
        return Err(fail(StatusCode::FORBIDDEN, "Not enough permissions"));
    }
    let readings = st.readings.lock().clone();
    let list: Vec<Value> = readings
        .into_iter()
        .filter(|r| q.get("meter_type").map_or(true, |t| r["meter_type"] == t.as_str()))
        .filter(|r| flag(&q, "verified").map_or(true, |v| r["verified"] == v))
        .map(|mut r| {
            r["user"] = r["user_id"].as_i64().and_then(|id| st.profile(id)).unwrap_or(Value::Null);
            r
        })
        .collect();
    Ok(Json(json!({ "total": list.len(), "readings": list })))
}

async fn get_reading(State(st): Shared, headers: HeaderMap, Path(id): Path<i64>) -> ApiReply {
    st.hit("GET /meter-readings/{id}");
    let user = st.caller(&headers)?;
    let reading = st
        .readings
        .lock()
        .iter()
        .find(|r| r["id"] == id)
        .cloned()
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "Meter reading not found"))?;
    if !is_staff(&user) && reading["user_id"] != user["id"] {
        return Err(fail(StatusCode::FORBIDDEN, "Not enough permissions"));
    }
    Ok(Json(reading))
}

async fn verify_reading(State(st): Shared, headers: HeaderMap, Path(id): Path<i64>) -> ApiReply {
    st.hit("PATCH /meter-readings/{id}/verify");
    let user = st.caller(&headers)?;
    if !is_staff(&user) {
        return Err(fail(StatusCode::FORBIDDEN, "Not enough permissions"));
    }
    let mut readings = st.readings.lock();
    let reading = readings
        .iter_mut()
        .find(|r| r["id"] == id)
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "Meter reading not found"))?;
    reading["verified"] = json!(true);
    reading["verified_by"] = user["id"].clone();
    reading["verified_at"] = json!("2024-06-02T12:00:00");
    Ok(Json(reading.clone()))
}

async fn delete_reading(State(st): Shared, headers: HeaderMap, Path(id): Path<i64>) -> ApiReply {
    st.hit("DELETE /meter-readings/{id}");
    let user = st.caller(&headers)?;
    let mut readings = st.readings.lock();
    let pos = readings
        .iter()
        .position(|r| r["id"] == id)
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "Meter reading not found"))?;
    if !is_admin(&user) && readings[pos]["user_id"] != user["id"] {
        return Err(fail(StatusCode::FORBIDDEN, "Not enough permissions"));
    }
    readings.remove(pos);
    Ok(Json(json!({ "message": "Meter reading deleted successfully" })))
}

async fn my_invoices(State(st): Shared, headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> ApiReply {
    st.hit("GET /invoices/my-invoices");
    let user = st.caller(&headers)?;
    let list: Vec<Value> = st
        .invoices
        .lock()
        .iter()
        .filter(|i| i["user_id"] == user["id"])
        .filter(|i| flag(&q, "paid").map_or(true, |p| i["paid"] == p))
        .cloned()
        .collect();
    Ok(Json(json!({ "total": list.len(), "invoices": list })))
}

async fn all_invoices(State(st): Shared, headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> ApiReply {
    st.hit("GET /invoices/all");
    let user = st.caller(&headers)?;
    if !is_staff(&user) {
        return Err(fail(StatusCode::FORBIDDEN, "Not enough permissions"));
    }
    let uid: Option<i64> = q.get("user_id").and_then(|v| v.parse().ok());
    let list: Vec<Value> = st
        .invoices
        .lock()
        .iter()
        .filter(|i| flag(&q, "paid").map_or(true, |p| i["paid"] == p))
        .filter(|i| uid.map_or(true, |u| i["user_id"] == u))
        .cloned()
        .collect();
    Ok(Json(json!({ "total": list.len(), "invoices": list })))
}

async fn summary(State(st): Shared, headers: HeaderMap) -> ApiReply {
    st.hit("GET /invoices/summary");
    let user = st.caller(&headers)?;
    let scoped: Vec<Value> = st
        .invoices
        .lock()
        .iter()
        .filter(|i| is_staff(&user) || i["user_id"] == user["id"])
        .cloned()
        .collect();
    let amount = |pred: &dyn Fn(&Value) -> bool| -> f64 {
        scoped.iter().filter(|i| pred(i)).filter_map(|i| i["amount"].as_f64()).sum()
    };
    let total_amount = amount(&|_| true);
    let paid_amount = amount(&|i| i["paid"] == true);
    let paid = scoped.iter().filter(|i| i["paid"] == true).count();
    Ok(Json(json!({
        "total_invoices": scoped.len(), "total_amount": total_amount,
        "paid_invoices": paid, "paid_amount": paid_amount,
        "pending_invoices": scoped.len() - paid, "pending_amount": total_amount - paid_amount
    })))
}

async fn generate_all(State(st): Shared, headers: HeaderMap) -> ApiReply {
    st.hit("POST /invoices/generate-all");
    let user = st.caller(&headers)?;
    if !is_staff(&user) {
        return Err(fail(StatusCode::FORBIDDEN, "Not enough permissions"));
    }
    Ok(Json(Value::Array(st.generate(None))))
}

async fn generate_for_user(State(st): Shared, headers: HeaderMap, Path(user_id): Path<i64>) -> ApiReply {
    st.hit("POST /invoices/generate-for-user/{user_id}");
    let user = st.caller(&headers)?;
    if !is_staff(&user) {
        return Err(fail(StatusCode::FORBIDDEN, "Not enough permissions"));
    }
    Ok(Json(Value::Array(st.generate(Some(user_id)))))
}

async fn get_invoice(State(st): Shared, headers: HeaderMap, Path(id): Path<i64>) -> ApiReply {
    st.hit("GET /invoices/{id}");
    let user = st.caller(&headers)?;
    let invoice = st
        .invoices
        .lock()
        .iter()
        .find(|i| i["id"] == id)
        .cloned()
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "Invoice not found"))?;
    if !is_staff(&user) && invoice["user_id"] != user["id"] {
        return Err(fail(StatusCode::FORBIDDEN, "Not enough permissions"));
    }
    Ok(Json(invoice))
}

async fn pay_invoice(State(st): Shared, headers: HeaderMap, Path(id): Path<i64>) -> ApiReply {
    st.hit("PATCH /invoices/{id}/pay");
    let user = st.caller(&headers)?;
    let mut invoices = st.invoices.lock();
    let invoice = invoices
        .iter_mut()
        .find(|i| i["id"] == id)
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "Invoice not found"))?;
    if !is_admin(&user) && invoice["user_id"] != user["id"] {
        return Err(fail(StatusCode::FORBIDDEN, "Not enough permissions"));
    }
    if invoice["paid"] == true {
        return Err(fail(StatusCode::BAD_REQUEST, "Invoice already paid"));
    }
    invoice["paid"] = json!(true);
    invoice["paid_at"] = json!("2024-06-10T15:00:00");
    Ok(Json(invoice.clone()))
}

/// Start the mock API; returns its state handle and base URL.
pub async fn spawn_mock() -> (Arc<MockApi>, String) {
    spawn_mock_under("").await
}

/// Mock API mounted beneath `prefix` (e.g. "/api/v1"); the base URL includes the prefix.
/// Requests outside the prefix get 404.
pub async fn spawn_mock_under(prefix: &str) -> (Arc<MockApi>, String) {
    let st = Arc::new(MockApi::seeded());
    let api = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/me", get(me))
        .route("/meter-readings/upload", post(upload))
        .route("/meter-readings/my-readings", get(my_readings))
        .route("/meter-readings/all", get(all_readings))
        .route("/meter-readings/{id}", get(get_reading).delete(delete_reading))
        .route("/meter-readings/{id}/verify", patch(verify_reading))
        .route("/invoices/my-invoices", get(my_invoices))
        .route("/invoices/all", get(all_invoices))
        .route("/invoices/summary", get(summary))
        .route("/invoices/generate-all", post(generate_all))
        .route("/invoices/generate-for-user/{user_id}", post(generate_for_user))
        .route("/invoices/{id}", get(get_invoice))
        .route("/invoices/{id}/pay", patch(pay_invoice))
        .with_state(st.clone());
    let app = if prefix.is_empty() { api } else { Router::new().nest(prefix, api) };
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.expect("bind 127.0.0.1:0");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    meterbill::tprintln!("mock billing api listening on {}", addr);
    (st, format!("http://{}{}", addr, prefix))
}

pub fn config(base: &str, session_dir: &FsPath) -> ClientConfig {
    ClientConfig::new(base, session_dir).expect("mock base url")
}

/// Base URL nothing is listening on.
pub fn unreachable_base() -> String {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("bind 127.0.0.1:0");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}
