use std::sync::Arc;
use std::time::Duration;

use httpmock::MockServer;
use serde_json::json;

use postdeck::app::PostdeckError;
use postdeck::domain::{CurrentUser, PostDraft, Role, SortField, SortOrder};
use postdeck::external::{ExternalPostStore, HttpRestClient};

fn store(server: &MockServer) -> ExternalPostStore {
    let client = HttpRestClient::new(&server.url("/posts"), Duration::from_secs(5)).unwrap();
    ExternalPostStore::new(Arc::new(client)).with_count_limits(2, 10)
}

fn admin() -> CurrentUser {
    CurrentUser::new("root", Role::Admin, "Root")
}

#[tokio::test]
async fn list_page_sends_query_and_reads_total() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET")
            .path("/posts")
            .query_param("page", "2")
            .query_param("limit", "5")
            .query_param("sortBy", "createdAt")
            .query_param("order", "desc")
            .query_param("search", "Hello");
        then.status(200)
            .header("content-type", "application/json")
            .header("X-Total-Count", "7")
            .json_body(json!([
                {"id": 6, "title": "Hello six", "content": "c", "author": "Feed",
                 "createdAt": "2024-03-01T10:00:00.000Z"},
                {"id": "7", "title": "Hello seven", "content": "c"}
            ]));
    });

    let page = store(&server)
        .list_page(2, 5, SortField::Date, SortOrder::Desc, Some("Hello"))
        .await
        .unwrap();
    mock.assert();

    assert_eq!(page.total, Some(7));
    assert!(!page.has_more);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].id, "6");
    assert_eq!(page.items[0].author_name, "Feed");
    assert!(page.items.iter().all(|p| p.is_external && p.user_id.is_none()));
    assert_eq!(page.items[1].author_name, "Anonymous");
}

#[tokio::test]
async fn not_found_is_an_empty_page() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/posts");
        then.status(404).body("Not found");
    });

    let page = store(&server)
        .list_page(1, 5, SortField::Title, SortOrder::Asc, None)
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert!(!page.has_more);
}

#[tokio::test]
async fn server_error_surfaces_status_and_message() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/posts");
        then.status(500).body("backend down");
    });

    let err = store(&server)
        .list_page(1, 5, SortField::Date, SortOrder::Desc, None)
        .await
        .unwrap_err();
    match err {
        PostdeckError::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "backend down");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn count_reads_total_header() {
    let server = MockServer::start();
    let probe = server.mock(|when, then| {
        when.method("GET")
            .path("/posts")
            .query_param("page", "1")
            .query_param("limit", "1");
        then.status(200)
            .header("X-Total-Count", "42")
            .json_body(json!([{"id": 1, "title": "t", "content": "c"}]));
    });

    assert_eq!(store(&server).count_total(None).await.unwrap(), 42);
    probe.assert();
}

#[tokio::test]
async fn count_walks_pages_without_header() {
    let server = MockServer::start();
    let probe = server.mock(|when, then| {
        when.method("GET").path("/posts").query_param("limit", "1");
        then.status(200)
            .json_body(json!([{"id": 1, "title": "t", "content": "c"}]));
    });
    let first = server.mock(|when, then| {
        when.method("GET")
            .path("/posts")
            .query_param("page", "1")
            .query_param("limit", "2");
        then.status(200).json_body(json!([
            {"id": 1, "title": "a", "content": "c"},
            {"id": 2, "title": "b", "content": "c"}
        ]));
    });
    let second = server.mock(|when, then| {
        when.method("GET")
            .path("/posts")
            .query_param("page", "2")
            .query_param("limit", "2");
        then.status(200)
            .json_body(json!([{"id": 3, "title": "c", "content": "c"}]));
    });

    assert_eq!(store(&server).count_total(None).await.unwrap(), 3);
    probe.assert();
    first.assert();
    second.assert();
}

#[tokio::test]
async fn create_posts_json_and_maps_response() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("POST")
            .path("/posts")
            .json_body_includes(r#"{"title":"Fresh","content":"Body","authorName":"Root"}"#);
        then.status(201).json_body(json!({
            "id": 99, "title": "Fresh", "content": "Body", "authorName": "Root",
            "createdAt": "2024-03-02T08:00:00.000Z"
        }));
    });

    let post = store(&server)
        .create(Some(&admin()), &PostDraft::new(" Fresh ", "Body"))
        .await
        .unwrap();
    mock.assert();
    assert_eq!(post.id, "99");
    assert!(post.is_external);
}

#[tokio::test]
async fn delete_targets_resource_url() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("DELETE").path("/posts/17");
        then.status(200);
    });

    store(&server).delete_one(Some(&admin()), "17").await.unwrap();
    mock.assert();
}

#[tokio::test]
async fn standard_user_mutations_send_nothing() {
    let server = MockServer::start();
    let any = server.mock(|_when, then| {
        then.status(200);
    });

    let user = CurrentUser::new("u1", Role::User, "Ann");
    let store = store(&server);
    assert!(matches!(
        store.delete_one(Some(&user), "1").await,
        Err(PostdeckError::Unauthorized(_))
    ));
    assert!(matches!(
        store.create(Some(&user), &PostDraft::new("t", "c")).await,
        Err(PostdeckError::Unauthorized(_))
    ));
    assert!(matches!(
        store.delete_many(None, &["1".into()]).await,
        Err(PostdeckError::Unauthorized(_))
    ));
    any.assert_calls(0);
}
