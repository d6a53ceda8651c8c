use chrono::{Duration as ChronoDuration, Utc};
use clinicore_auth::{JwtClaims, PrincipalId, Role};
use clinicore_core::OrganizationId;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(jwt_secret: &str) -> Self {
        // Build app (same router as prod), but bind to an ephemeral port.
        let app = clinicore_api::app::build_app(jwt_secret.to_string()).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(jwt_secret: &str, organization_id: OrganizationId, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: PrincipalId::new(),
        organization_id,
        clinic_id: None,
        roles,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn get_invoice_eventually(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    id: &str,
    cond: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    // The API is intentionally eventual-consistent (command path vs projection
    // update). Poll briefly until the projection catches up.
    for _ in 0..100 {
        let res = client
            .get(format!("{}/billing/{}", base_url, id))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();

        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if cond(&body) {
                return body;
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("invoice did not become visible in projection within timeout");
}

async fn create_invoice(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    total: u64,
) -> (String, String) {
    let res = client
        .post(format!("{}/billing", base_url))
        .bearer_auth(token)
        .json(&json!({
            "patient_id": uuid::Uuid::now_v7().to_string(),
            "due_date": (Utc::now() + ChronoDuration::days(30)).to_rfc3339(),
            "lines": [
                { "description": "Root canal, molar", "procedure_code": "D3330", "quantity": 1, "unit_price": total }
            ],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    (
        body["id"].as_str().unwrap().to_string(),
        body["invoice_number"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn organization_context_is_derived_from_token() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let organization_id = OrganizationId::new();
    let token = mint_jwt(jwt_secret, organization_id, vec![Role::new("admin")]);

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(
        body["organization_id"].as_str().unwrap(),
        organization_id.to_string()
    );
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "admin"));
}

#[tokio::test]
async fn invoice_numbers_are_sequential_within_the_month() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let token = mint_jwt(jwt_secret, OrganizationId::new(), vec![Role::new("admin")]);
    let client = reqwest::Client::new();

    let mut numbers = Vec::new();
    for _ in 0..4 {
        let (_id, number) = create_invoice(&client, &srv.base_url, &token, 500).await;
        numbers.push(number);
    }

    let period = Utc::now().format("%Y%m").to_string();
    for (idx, number) in numbers.iter().enumerate() {
        assert_eq!(number, &format!("INV-{}-{:04}", period, idx + 1));
    }
}

#[tokio::test]
async fn payment_lifecycle_updates_the_ledger() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let token = mint_jwt(jwt_secret, OrganizationId::new(), vec![Role::new("admin")]);
    let client = reqwest::Client::new();

    let (id, number) = create_invoice(&client, &srv.base_url, &token, 9440).await;
    assert!(number.starts_with("INV-"));

    let body =
        get_invoice_eventually(&client, &srv.base_url, &token, &id, |b| b["status"] == "unpaid")
            .await;
    assert_eq!(body["total_amount"], 9440);
    assert_eq!(body["balance_amount"], 9440);

    // Partial payment: 5000 of 9440.
    let res = client
        .post(format!("{}/billing/{}/payments", srv.base_url, id))
        .bearer_auth(&token)
        .json(&json!({ "amount": 5000, "method": "cash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let payment: serde_json::Value = res.json().await.unwrap();
    let payment_id = payment["payment_id"].as_str().unwrap().to_string();

    let body = get_invoice_eventually(&client, &srv.base_url, &token, &id, |b| {
        b["amount_paid"] == 5000
    })
    .await;
    assert_eq!(body["balance_amount"], 4440);
    assert_eq!(body["status"], "partially paid");
    assert_eq!(body["payments"].as_array().unwrap().len(), 1);
    assert!(
        body["payments"][0]["receipt_number"]
            .as_str()
            .unwrap()
            .starts_with("P-")
    );

    // Edit the payment up to 6000.
    let res = client
        .put(format!("{}/billing/{}/payments/{}", srv.base_url, id, payment_id))
        .bearer_auth(&token)
        .json(&json!({ "amount": 6000, "method": "card", "transaction_id": "tx-12" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = get_invoice_eventually(&client, &srv.base_url, &token, &id, |b| {
        b["amount_paid"] == 6000
    })
    .await;
    assert_eq!(body["balance_amount"], 3440);
    assert_eq!(body["payments"][0]["method"], "card");

    // Pay the rest; paid exactly.
    let res = client
        .post(format!("{}/billing/{}/payments", srv.base_url, id))
        .bearer_auth(&token)
        .json(&json!({ "amount": 3440, "method": "bank_transfer" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = get_invoice_eventually(&client, &srv.base_url, &token, &id, |b| {
        b["amount_paid"] == 9440
    })
    .await;
    assert_eq!(body["balance_amount"], 0);
    assert_eq!(body["status"], "paid");

    // Remove the first payment again.
    let res = client
        .delete(format!("{}/billing/{}/payments/{}", srv.base_url, id, payment_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = get_invoice_eventually(&client, &srv.base_url, &token, &id, |b| {
        b["amount_paid"] == 3440
    })
    .await;
    assert_eq!(body["balance_amount"], 6000);
    assert_eq!(body["status"], "partially paid");
    assert_eq!(body["payments"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn overpayment_and_unknown_payments_are_rejected() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let token = mint_jwt(jwt_secret, OrganizationId::new(), vec![Role::new("admin")]);
    let client = reqwest::Client::new();

    let (id, _number) = create_invoice(&client, &srv.base_url, &token, 1000).await;

    // Overpay.
    let res = client
        .post(format!("{}/billing/{}/payments", srv.base_url, id))
        .bearer_auth(&token)
        .json(&json!({ "amount": 1500, "method": "cash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_amount");

    // Zero amount.
    let res = client
        .post(format!("{}/billing/{}/payments", srv.base_url, id))
        .bearer_auth(&token)
        .json(&json!({ "amount": 0, "method": "cash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Unknown payment entry: 404, named distinctly from the invoice.
    let res = client
        .delete(format!(
            "{}/billing/{}/payments/{}",
            srv.base_url,
            id,
            uuid::Uuid::now_v7()
        ))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["message"], "payment not found");

    // Unknown invoice: also 404, but the invoice is what's missing.
    let res = client
        .post(format!(
            "{}/billing/{}/payments",
            srv.base_url,
            uuid::Uuid::now_v7()
        ))
        .bearer_auth(&token)
        .json(&json!({ "amount": 100, "method": "cash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["message"], "invoice not found");
}

#[tokio::test]
async fn invoices_are_isolated_between_organizations() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let client = reqwest::Client::new();

    let token_a = mint_jwt(jwt_secret, OrganizationId::new(), vec![Role::new("admin")]);
    let token_b = mint_jwt(jwt_secret, OrganizationId::new(), vec![Role::new("admin")]);

    let (id, _number) = create_invoice(&client, &srv.base_url, &token_a, 2000).await;
    get_invoice_eventually(&client, &srv.base_url, &token_a, &id, |b| {
        b["status"] == "unpaid"
    })
    .await;

    let res = client
        .get(format!("{}/billing/{}", srv.base_url, id))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(format!("{}/billing", srv.base_url))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn non_admin_roles_are_forbidden_from_dispatching_commands() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let token = mint_jwt(
        jwt_secret,
        OrganizationId::new(),
        vec![Role::new("receptionist")],
    );
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/patients", srv.base_url))
        .bearer_auth(&token)
        .json(&json!({ "name": "Omar Farouk" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn prescription_numbers_are_an_organization_wide_running_count() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let token = mint_jwt(jwt_secret, OrganizationId::new(), vec![Role::new("admin")]);
    let client = reqwest::Client::new();

    for expected in ["RX000001", "RX000002", "RX000003"] {
        let res = client
            .post(format!("{}/prescriptions", srv.base_url))
            .bearer_auth(&token)
            .json(&json!({
                "patient_id": uuid::Uuid::now_v7().to_string(),
                "items": [{
                    "drug": "Ibuprofen 400mg",
                    "dosage": "1 tablet",
                    "frequency": "three times daily",
                    "duration_days": 5,
                    "instructions": null,
                }],
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["rx_number"], expected);
    }
}
