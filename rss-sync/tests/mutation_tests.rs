mod common;

use std::time::Duration;

use common::{article, article_with, client_for, page};
use rss_sync::models::{Article, ArticlePage, MutationKind};
use rss_sync::view::detail_key;
use rss_sync::{Level, MutationState, PaginationController, SyncClient, SyncError};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn cached_list(server: &MockServer, client: &SyncClient) -> rss_sync::QueryKey {
    Mock::given(method("GET"))
        .and(path("/api/v1/articles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![article(4), article(5)],
            2,
            1,
        )))
        .mount(server)
        .await;
    let view = client.article_list(PaginationController::new());
    view.load_awaited().await;
    view.active_key().await
}

async fn cached_flag(client: &SyncClient, key: &rss_sync::QueryKey, id: i64) -> (bool, bool) {
    let page = client.cache().peek::<ArticlePage>(key).await.unwrap();
    let article = page.items.iter().find(|a| a.id == id).unwrap();
    (article.is_read, article.is_starred)
}

#[tokio::test]
async fn toggle_updates_every_cached_copy() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let key = cached_list(&server, &client).await;
    let detail: Article = serde_json::from_value(article(5)).unwrap();
    client.cache().write(detail_key(5), detail).await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/articles/5/read"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(article_with(5, json!({ "is_read": true }))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let updated = client.mutations().toggle_read(5).await.unwrap();
    assert!(updated.is_read);
    assert_eq!(cached_flag(&client, &key, 5).await, (true, false));
    assert_eq!(cached_flag(&client, &key, 4).await, (false, false));
    let detail = client.cache().peek::<Article>(&detail_key(5)).await.unwrap();
    assert!(detail.is_read);
    assert_eq!(
        client.mutations().state(5, MutationKind::ToggleRead).await,
        MutationState::Committed
    );
    // the list is refetched on next read
    assert!(client.cache().entry_state(&key).await.unwrap().is_stale);
}

#[tokio::test]
async fn double_toggle_returns_to_original_value() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let key = cached_list(&server, &client).await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/articles/5/star"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(article_with(5, json!({ "is_starred": true }))),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/articles/5/star"))
        .respond_with(ResponseTemplate::new(200).set_body_json(article(5)))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    assert!(client.mutations().toggle_star(5).await.unwrap().is_starred);
    assert!(!client.mutations().toggle_star(5).await.unwrap().is_starred);
    assert_eq!(cached_flag(&client, &key, 5).await, (false, false));
}

#[tokio::test]
async fn server_error_rolls_back_optimistic_flip() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let key = cached_list(&server, &client).await;
    let mut notes = client.subscribe();

    Mock::given(method("PUT"))
        .and(path("/api/v1/articles/5/read"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "detail": "database is locked" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client.mutations().toggle_read(5).await.unwrap_err();
    assert_eq!(
        err,
        SyncError::Server {
            status: 500,
            detail: "database is locked".into()
        }
    );
    assert_eq!(cached_flag(&client, &key, 5).await, (false, false));
    assert_eq!(
        client.mutations().state(5, MutationKind::ToggleRead).await,
        MutationState::RolledBack
    );
    let note = notes.recv().await.unwrap();
    assert_eq!(note.level, Level::Error);
}

#[tokio::test]
async fn missing_article_is_reported_as_not_found() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    Mock::given(method("PUT"))
        .and(path("/api/v1/articles/99/read"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "detail": "Article not found" })),
        )
        .mount(&server)
        .await;

    let err = client.mutations().toggle_read(99).await.unwrap_err();
    assert_eq!(err, SyncError::NotFound("Article not found".into()));
}

#[tokio::test]
async fn toggles_on_one_article_run_one_at_a_time() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let key = cached_list(&server, &client).await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/articles/5/read"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(article_with(5, json!({ "is_read": true })))
                .set_delay(Duration::from_millis(300)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/articles/5/read"))
        .respond_with(ResponseTemplate::new(200).set_body_json(article(5)))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let first = {
        let mutations = client.mutations().clone();
        tokio::spawn(async move { mutations.toggle_read(5).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = {
        let mutations = client.mutations().clone();
        tokio::spawn(async move { mutations.toggle_read(5).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the second toggle waits for the first round trip
    let seen = server.received_requests().await.unwrap();
    let puts = seen.iter().filter(|r| r.method.as_str() == "PUT").count();
    assert_eq!(puts, 1);
    assert_eq!(cached_flag(&client, &key, 5).await, (true, false));

    assert!(first.await.unwrap().unwrap().is_read);
    assert!(!second.await.unwrap().unwrap().is_read);
    assert_eq!(cached_flag(&client, &key, 5).await, (false, false));
}

#[tokio::test]
async fn abandoned_toggle_still_rolls_back() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let key = cached_list(&server, &client).await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/articles/5/read"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({ "detail": "database is locked" }))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let caller = {
        let mutations = client.mutations().clone();
        tokio::spawn(async move { mutations.toggle_read(5).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cached_flag(&client, &key, 5).await, (true, false));
    caller.abort();
    assert!(caller.await.unwrap_err().is_cancelled());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(cached_flag(&client, &key, 5).await, (false, false));
    assert_eq!(
        client.mutations().state(5, MutationKind::ToggleRead).await,
        MutationState::RolledBack
    );
    assert!(!client.mutations().is_busy(5).await);
}

#[tokio::test]
async fn abandoned_toggle_still_commits() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    let key = cached_list(&server, &client).await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/articles/5/star"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(article_with(5, json!({ "is_starred": true })))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let caller = {
        let mutations = client.mutations().clone();
        tokio::spawn(async move { mutations.toggle_star(5).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    caller.abort();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(cached_flag(&client, &key, 5).await, (false, true));
    assert_eq!(
        client.mutations().state(5, MutationKind::ToggleStar).await,
        MutationState::Committed
    );
    assert!(!client.mutations().is_busy(5).await);
}
