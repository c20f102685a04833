//! End-to-end tests for the image pipeline
//!
//! Runs the image worker against the fake image host and checks what the
//! catalog pages report afterwards.

mod common;

use common::{TestClient, TestServer, BRICK_SHAPE_ID, MINIFIG_ID, SET_1_ID};
use lego_catalog::image_pipeline::TaskStatus;
use reqwest::StatusCode;
use serde_json::Value;

async fn set_detail(client: &TestClient) -> Value {
    let response = client.get_set(SET_1_ID).await;
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

fn item<'a>(body: &'a Value, shape_id: &str, color: Option<&str>) -> &'a Value {
    body["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|item| {
            item["part"]["shape_lego_id"] == shape_id
                && match color {
                    Some(name) => item["part"]["color"]["name"] == name,
                    None => item["part"]["color"].is_null(),
                }
        })
        .expect("Item missing")
}

#[tokio::test]
async fn test_sync_queues_image_tasks() {
    let server = TestServer::spawn().await;

    // set image, minifig, red brick, blue brick, plate
    let ready = server.image_tasks.count_by_status(TaskStatus::Ready).unwrap();
    assert_eq!(ready, 5);
}

#[tokio::test]
async fn test_worker_stores_images() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let processed = server.image_worker().run_pending(None).await.unwrap();
    assert_eq!(processed, 5);
    assert_eq!(
        server.image_tasks.count_by_status(TaskStatus::Ready).unwrap(),
        0
    );
    assert_eq!(
        server.image_tasks.count_by_status(TaskStatus::Failed).unwrap(),
        0
    );

    let body = set_detail(&client).await;

    let set_image = body["image"].as_str().expect("Set image missing");
    assert!(set_image.starts_with("/static/lego/img/sets/"));
    assert!(set_image.ends_with(".png"));

    let response = client.get_path(set_image).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.bytes().await.unwrap();
    let stored = image::load_from_memory(&bytes).unwrap();
    // 768x512 shrunk into the 384x384 box
    assert_eq!((stored.width(), stored.height()), (384, 256));

    let red_brick = item(&body, BRICK_SHAPE_ID, Some("Red"));
    assert!(red_brick["part"]["image"]
        .as_str()
        .unwrap()
        .starts_with("/static/lego/img/parts/"));
}

#[tokio::test]
async fn test_unsupported_image_is_abandoned() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    server.image_worker().run_pending(None).await.unwrap();

    let body = set_detail(&client).await;
    let minifig = item(&body, MINIFIG_ID, None);
    assert!(minifig["part"]["image"].is_null());

    // The image record and its origin URL are gone
    let part_id = minifig["part"]["id"].as_i64().unwrap();
    let part = server.catalog_store.get_part(part_id).unwrap().unwrap();
    assert!(part.image_id.is_none());
}

#[tokio::test]
async fn test_missing_static_file_is_not_reported() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    server.image_worker().run_pending(None).await.unwrap();
    std::fs::remove_dir_all(server.static_dir.join("lego/img/sets")).unwrap();

    let body = set_detail(&client).await;
    assert!(body["image"].is_null());

    let response = client.get_index().await;
    let body: Value = response.json().await.unwrap();
    assert!(body["sets"][0]["image"].is_null());
}
