use planboard_core::store::{RecordStore, RestStore, Row, row_id};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "anon-key";

fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

/// The blocking client must not run on the async test runtime.
async fn with_store<T, F>(server: &MockServer, call: F) -> T
where
    T: Send + 'static,
    F: FnOnce(&RestStore) -> T + Send + 'static,
{
    let uri = server.uri();
    tokio::task::spawn_blocking(move || {
        let store = RestStore::new(&uri, KEY).expect("client");
        call(&store)
    })
    .await
    .expect("blocking task")
}

#[tokio::test]
async fn insert_asks_for_the_stored_row() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/day_notes"))
        .and(header("apikey", KEY))
        .and(header("authorization", "Bearer anon-key"))
        .and(header("prefer", "return=representation"))
        .and(body_json(json!({"date": "2026-10-16", "text": "dentist"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            {"id": 42, "date": "2026-10-16", "text": "dentist"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let inserted = with_store(&server, |store| {
        store.insert(
            "day_notes",
            row(json!({"date": "2026-10-16", "text": "dentist"})),
        )
    })
    .await
    .expect("insert");
    assert_eq!(row_id(&inserted).as_deref(), Some("42"));
}

#[tokio::test]
async fn select_update_and_delete_use_postgrest_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/timetable_tasks"))
        .and(query_param("select", "*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "a1", "title": "Maths"},
            {"id": "b2", "title": "Art"}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/timetable_tasks"))
        .and(query_param("id", "eq.a1"))
        .and(body_json(json!({"title": "Algebra"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/timetable_tasks"))
        .and(query_param("id", "eq.b2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let rows = with_store(&server, |store| {
        let rows = store.select("timetable_tasks")?;
        store.update("timetable_tasks", "a1", row(json!({"title": "Algebra"})))?;
        store.delete("timetable_tasks", "b2")?;
        anyhow::Ok(rows)
    })
    .await
    .expect("calls");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["title"], "Art");
}

#[tokio::test]
async fn rejected_requests_are_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "Could not find the 'title' column of 'timetable'"
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/empty"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .with_priority(1)
        .mount(&server)
        .await;

    let (insert, update, empty) = with_store(&server, |store| {
        (
            store.insert("timetable", row(json!({"title": "x"}))),
            store.update("timetable", "7", Row::new()),
            store.insert("empty", Row::new()),
        )
    })
    .await;
    let insert = insert.expect_err("bad request");
    assert!(format!("{insert:#}").contains("was rejected"));
    assert!(update.is_err());
    let empty = empty.expect_err("empty insert response");
    assert!(empty.to_string().contains("returned no row"));
}
