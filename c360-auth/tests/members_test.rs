mod common;

use axum::http::{Method, StatusCode};
use common::{error_code, Session, TestApp};
use serde_json::json;

struct Company {
    app: TestApp,
    owner: Session,
}

impl Company {
    async fn new() -> Self {
        let app = TestApp::spawn();
        let owner = app.register("owner@x.com", "pw").await;
        Self { app, owner }
    }

    fn members_uri(&self) -> String {
        format!("/v1/companies/{}/members", self.owner.tenant_id)
    }

    async fn member_uri(&self, email: &str) -> String {
        format!("{}/{}", self.members_uri(), self.app.user_id(email).await)
    }

    async fn invite(&self, email: &str, role: &str) -> Session {
        self.app.register(email, "pw").await;
        let (status, body) = self
            .app
            .post(
                &self.members_uri(),
                Some(&self.owner.access_token),
                json!({ "email": email, "role": role }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");

        let (_, body) = self
            .app
            .post(
                "/v1/auth/login",
                None,
                json!({ "email": email, "password": "pw", "tenant_id": self.owner.tenant_id }),
            )
            .await;
        Session::from_body(&body)
    }
}

#[tokio::test]
async fn test_owner_adds_and_lists_members() {
    let c = Company::new().await;
    c.app.register("B@X.com", "pw").await;

    // Lookups are exact: another casing is another address.
    let (status, _) = c
        .app
        .post(
            &c.members_uri(),
            Some(&c.owner.access_token),
            json!({ "email": "b@x.com", "role": "contributor" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = c
        .app
        .post(
            &c.members_uri(),
            Some(&c.owner.access_token),
            json!({ "email": "B@X.com", "role": "contributor" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["email"], "B@X.com");
    assert_eq!(body["role"], "contributor");

    let (status, body) = c.app.get(&c.members_uri(), Some(&c.owner.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_add_member_errors() {
    let c = Company::new().await;
    c.invite("b@x.com", "auditor").await;

    let (status, body) = c
        .app
        .post(
            &c.members_uri(),
            Some(&c.owner.access_token),
            json!({ "email": "b@x.com", "role": "admin" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "CONFLICT");

    let (status, body) = c
        .app
        .post(
            &c.members_uri(),
            Some(&c.owner.access_token),
            json!({ "email": "ghost@x.com", "role": "admin" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");

    let (status, _) = c
        .app
        .post(
            &c.members_uri(),
            Some(&c.owner.access_token),
            json!({ "email": "b@x.com", "role": "superuser" }),
        )
        .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_owner_cannot_remove_self() {
    let c = Company::new().await;
    let uri = c.member_uri("owner@x.com").await;

    let (status, body) = c
        .app
        .request(Method::DELETE, &uri, Some(&c.owner.access_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "FORBIDDEN");
}

#[tokio::test]
async fn test_admin_cannot_touch_owners() {
    let c = Company::new().await;
    let admin = c.invite("admin@x.com", "admin").await;
    c.invite("m@x.com", "auditor").await;
    let owner_uri = c.member_uri("owner@x.com").await;
    let member_uri = c.member_uri("m@x.com").await;

    let (status, _) = c
        .app
        .request(Method::DELETE, &owner_uri, Some(&admin.access_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = c
        .app
        .request(
            Method::PATCH,
            &owner_uri,
            Some(&admin.access_token),
            Some(json!({ "role": "contributor" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = c
        .app
        .request(
            Method::PATCH,
            &member_uri,
            Some(&admin.access_token),
            Some(json!({ "role": "owner" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Non-owner changes are fine
    let (status, body) = c
        .app
        .request(
            Method::PATCH,
            &member_uri,
            Some(&admin.access_token),
            Some(json!({ "role": "contributor" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "contributor");

    let (status, _) = c
        .app
        .request(Method::DELETE, &member_uri, Some(&admin.access_token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_last_owner_cannot_be_demoted() {
    let c = Company::new().await;
    let uri = c.member_uri("owner@x.com").await;

    let (status, _) = c
        .app
        .request(
            Method::PATCH,
            &uri,
            Some(&c.owner.access_token),
            Some(json!({ "role": "admin" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // With a second owner the demotion goes through
    c.invite("co@x.com", "owner").await;
    let (status, body) = c
        .app
        .request(
            Method::PATCH,
            &uri,
            Some(&c.owner.access_token),
            Some(json!({ "role": "admin" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "admin");
}

#[tokio::test]
async fn test_unknown_member_and_bad_id() {
    let c = Company::new().await;

    let (status, _) = c
        .app
        .request(
            Method::DELETE,
            &format!("{}/{}", c.members_uri(), uuid::Uuid::new_v4()),
            Some(&c.owner.access_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = c
        .app
        .request(
            Method::DELETE,
            &format!("{}/not-a-uuid", c.members_uri()),
            Some(&c.owner.access_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Invalid user id");
}

#[tokio::test]
async fn test_audit_log_lists_membership_changes_newest_first() {
    let c = Company::new().await;
    c.invite("b@x.com", "contributor").await;
    let uri = c.member_uri("b@x.com").await;
    c.app
        .request(Method::DELETE, &uri, Some(&c.owner.access_token), None)
        .await;

    let (status, body) = c
        .app
        .get(
            &format!("/v1/companies/{}/audit?limit=2", c.owner.tenant_id),
            Some(&c.owner.access_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0], "member.remove");

    let (status, _) = c
        .app
        .get(
            &format!("/v1/companies/{}/audit?limit=0", c.owner.tenant_id),
            Some(&c.owner.access_token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
