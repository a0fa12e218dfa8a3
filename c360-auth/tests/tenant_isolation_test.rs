mod common;

use axum::http::{Method, StatusCode};
use c360_auth::{
    models::{AuditEntry, Membership, Role, TenantId},
    services::AuthStore,
};
use common::{error_code, Session, TestApp};
use serde_json::json;

async fn add_member(app: &TestApp, owner: &Session, email: &str, role: &str) -> Session {
    app.register(email, "pw").await;
    let (status, _) = app
        .post(
            &format!("/v1/companies/{}/members", owner.tenant_id),
            Some(&owner.access_token),
            json!({ "email": email, "role": role }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .post(
            "/v1/auth/login",
            None,
            json!({ "email": email, "password": "pw", "tenant_id": owner.tenant_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    Session::from_body(&body)
}

#[tokio::test]
async fn test_every_company_route_rejects_foreign_tenant() {
    let app = TestApp::spawn();
    let a = app.register("a@x.com", "pw1").await;
    let b = app.register("b@x.com", "pw2").await;
    let b_user = app.user_id("b@x.com").await;

    let routes = [
        (Method::GET, format!("/v1/companies/{}/members", b.tenant_id), None),
        (
            Method::POST,
            format!("/v1/companies/{}/members", b.tenant_id),
            Some(json!({ "email": "a@x.com", "role": "admin" })),
        ),
        (
            Method::PATCH,
            format!("/v1/companies/{}/members/{}", b.tenant_id, b_user),
            Some(json!({ "role": "auditor" })),
        ),
        (
            Method::DELETE,
            format!("/v1/companies/{}/members/{}", b.tenant_id, b_user),
            None,
        ),
        (Method::GET, format!("/v1/companies/{}/audit", b.tenant_id), None),
    ];

    for (method, uri, body) in routes {
        let (status, response) = app
            .request(method.clone(), &uri, Some(&a.access_token), body)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
        assert_eq!(error_code(&response), "FORBIDDEN");
        assert!(!response.to_string().contains(&b.tenant_id));
    }

    // Nothing changed in the foreign company
    let membership = app
        .store
        .find_membership(&TenantId::from(b.tenant_id.clone()), b_user)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(membership.role, Role::Owner);
    assert!(app
        .store
        .find_membership(
            &TenantId::from(b.tenant_id.clone()),
            app.user_id("a@x.com").await
        )
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_global_tenant_is_never_reachable() {
    let app = TestApp::spawn();
    let a = app.register("a@x.com", "pw1").await;

    let (status, _) = app
        .get("/v1/companies/global/audit", Some(&a.access_token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_login_to_company_without_membership_forbidden() {
    let app = TestApp::spawn();
    app.register("a@x.com", "pw1").await;
    let b = app.register("b@x.com", "pw2").await;

    let (status, body) = app
        .post(
            "/v1/auth/login",
            None,
            json!({ "email": "a@x.com", "password": "pw1", "tenant_id": b.tenant_id }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "FORBIDDEN");
}

#[tokio::test]
async fn test_role_denials() {
    let app = TestApp::spawn();
    let owner = app.register("owner@x.com", "pw").await;
    let contributor = add_member(&app, &owner, "c@x.com", "contributor").await;
    let auditor = add_member(&app, &owner, "au@x.com", "auditor").await;

    let members = format!("/v1/companies/{}/members", owner.tenant_id);
    let audit = format!("/v1/companies/{}/audit", owner.tenant_id);

    let (status, _) = app.get(&members, Some(&contributor.access_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.get(&members, Some(&auditor.access_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Audit log: auditor yes, contributor no
    let (status, _) = app.get(&audit, Some(&auditor.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get(&audit, Some(&contributor.access_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_role_change_applies_on_refresh() {
    let app = TestApp::spawn();
    let owner = app.register("owner@x.com", "pw").await;
    let member = add_member(&app, &owner, "m@x.com", "auditor").await;
    let member_id = app.user_id("m@x.com").await;

    let (status, _) = app
        .request(
            Method::PATCH,
            &format!("/v1/companies/{}/members/{}", owner.tenant_id, member_id),
            Some(&owner.access_token),
            Some(json!({ "role": "admin" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(
            "/v1/auth/refresh",
            None,
            json!({ "refresh_token": member.refresh_token, "tenant_id": owner.tenant_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "admin");

    let refreshed = Session::from_body(&body);
    let (status, _) = app
        .get(
            &format!("/v1/companies/{}/members", owner.tenant_id),
            Some(&refreshed.access_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_removed_member_cannot_refresh_into_company() {
    let app = TestApp::spawn();
    let owner = app.register("owner@x.com", "pw").await;
    let member = add_member(&app, &owner, "m@x.com", "contributor").await;
    let member_id = app.user_id("m@x.com").await;

    let tenant = TenantId::from(owner.tenant_id.clone());
    let audit = AuditEntry::new(tenant.clone(), member_id, "member.remove", chrono::Utc::now());
    app.store
        .delete_membership(&tenant, member_id, &audit)
        .await
        .unwrap();

    let (status, _) = app
        .post(
            "/v1/auth/refresh",
            None,
            json!({ "refresh_token": member.refresh_token, "tenant_id": owner.tenant_id }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_membership_rows_stay_in_their_tenant() {
    let app = TestApp::spawn();
    let owner = app.register("owner@x.com", "pw").await;
    let other = app.register("other@x.com", "pw").await;
    let other_id = app.user_id("other@x.com").await;

    // A membership that exists only in the other tenant
    let other_tenant = TenantId::from(other.tenant_id.clone());
    let owner_id = app.user_id("owner@x.com").await;
    app.store
        .insert_membership(
            &Membership::new(other_tenant.clone(), owner_id, Role::Auditor, chrono::Utc::now()),
            &AuditEntry::new(other_tenant, other_id, "member.add", chrono::Utc::now()),
        )
        .await
        .unwrap();

    let (status, body) = app
        .get(
            &format!("/v1/companies/{}/members", owner.tenant_id),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["user_id"].as_str().unwrap())
        .collect();
    assert!(!ids.contains(&other_id.to_string().as_str()));
    assert_eq!(ids.len(), 1);
}
