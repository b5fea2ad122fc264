//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for a listing site (and the station
//! API) and run complete site crawls against a temporary SQLite database.

use chintai_crawler::config::parse_config;
use chintai_crawler::crawler::Coordinator;
use chintai_crawler::record::ListingRecord;
use chintai_crawler::storage::{open_storage, ListingStore, RunStatus};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COLLECTION: &str = "room_tokyu";

/// Builds a site configuration pointing at the mock server
fn site_config(base_url: &str, db_path: &Path, extra_crawler: &str, extra_top: &str) -> String {
    format!(
        r#"
[crawler]
batch-size = 2
batch-delay-ms = 0
request-timeout-secs = 5
{extra_crawler}

[storage]
database-path = "{db}"
backup-dir = "{backups}"

{extra_top}

[[site]]
name = "tokyu"
collection = "{COLLECTION}"
id-base = 100
listing-url = "{base_url}/search/{{page}}"
item-selector = "a.room"
max-page-selector = "a.last"
default-pages = 1

[site.default-fields]
station_name_1 = "渋谷"

[[site.field]]
name = "room_type"
pattern = '<td class="layout">(.*?)</td>'

[[site.field]]
name = "map_lat"
pattern = '<td class="lat">(.*?)</td>'

[[site.field]]
name = "map_lng"
pattern = '<td class="lng">(.*?)</td>'

[[site.field]]
name = "floor"
pattern = '<td class="floor">(.*?)</td>'
kind = "floor"

[[site.image]]
category = "photo"
pattern = '<img class="photo" src="([^"]+)"'
"#,
        db = db_path.display(),
        backups = db_path.with_file_name("backups").display(),
    )
}

/// A search result page linking to the given rooms
fn index_page(rooms: &[u32]) -> String {
    let links: String = rooms
        .iter()
        .map(|n| format!(r#"<li><a class="room" href="/rooms/{}">Room {}</a></li>"#, n, n))
        .collect();
    format!("<html><body><ul>{}</ul></body></html>", links)
}

/// A detail page that passes the persistence gate
fn detail_page(room: u32) -> String {
    format!(
        r#"<html><body><table>
        <td class="layout">1LDK</td>
        <td class="lat">35.6{room}</td>
        <td class="lng">139.7</td>
        <td class="floor">3階/10階建</td>
        </table>
        <img class="photo" src="/img/{room}_a.jpg">
        <img class="photo" src="/img/{room}_b.jpg">
        <img class="photo" src="/img/{room}_c.jpg">
        </body></html>"#
    )
}

async fn mount_index(server: &MockServer, rooms: &[u32]) {
    Mock::given(method("GET"))
        .and(path("/search/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(index_page(rooms))
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

async fn mount_rooms(server: &MockServer, rooms: &[u32]) {
    for room in rooms {
        Mock::given(method("GET"))
            .and(path(format!("/rooms/{}", room)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(detail_page(*room))
                    .insert_header("content-type", "text/html"),
            )
            .mount(server)
            .await;
    }
}

fn coordinator(config: &str) -> Coordinator {
    let config = parse_config(config).expect("Failed to parse test config");
    Coordinator::new(config, "test-hash").expect("Failed to create coordinator")
}

fn room_url(server: &MockServer, room: u32) -> String {
    format!("{}/rooms/{}", server.uri(), room)
}

#[tokio::test]
async fn test_full_crawl_persists_listings() {
    let server = MockServer::start().await;
    mount_index(&server, &[1, 2, 3]).await;
    mount_rooms(&server, &[1, 2, 3]).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("listings.db");
    let coordinator = coordinator(&site_config(&server.uri(), &db_path, "", ""));

    let reports = coordinator.run_all(&[]).await.unwrap();
    assert_eq!(reports.len(), 1);

    let report = &reports[0];
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.total_urls, 3);
    assert_eq!(report.to_crawl, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(report.inserted, 3);
    assert_eq!(report.rejected, 0);
    assert_eq!(report.total_batches, 2);
    assert_eq!(report.batches_persisted, 2);
    drop(coordinator);

    let store = open_storage(&db_path).unwrap();
    let listings = store.list(COLLECTION).unwrap();
    let ids: Vec<i64> = listings.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![100, 101, 102]);

    let first = store.find_by_link(COLLECTION, &room_url(&server, 1)).unwrap().unwrap();
    let record = &first.record;
    assert_eq!(record.get_str("room_type"), Some("1LDK"));
    assert_eq!(record.get_i64("floor_no"), Some(3));
    assert_eq!(record.get_i64("floors"), Some(10));
    assert_eq!(record.get_str("station_name_1"), Some("渋谷"));
    assert_eq!(record.get_str("image_category_1"), Some("photo"));
    assert_eq!(
        record.get_str("image_url_3"),
        Some(format!("{}/img/1_c.jpg", server.uri()).as_str())
    );
    assert!(!record.contains("images"));

    let runs = store.latest_runs(5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].inserted, 3);
    assert_eq!(runs[0].config_hash, "test-hash");
}

#[tokio::test]
async fn test_fresh_listings_are_not_recrawled() {
    let server = MockServer::start().await;
    mount_index(&server, &[1, 2]).await;
    mount_rooms(&server, &[1, 2]).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("listings.db");
    let coordinator = coordinator(&site_config(&server.uri(), &db_path, "", ""));

    let first = coordinator.run_all(&[]).await.unwrap();
    assert_eq!(first[0].inserted, 2);

    let second = coordinator.run_all(&[]).await.unwrap();
    let report = &second[0];
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.fresh, 2);
    assert_eq!(report.to_crawl, 0);
    assert_eq!(report.processed, 0);
    assert_eq!(report.inserted, 0);
}

#[tokio::test]
async fn test_recrawl_keeps_identifiers() {
    let server = MockServer::start().await;
    mount_index(&server, &[1, 2]).await;
    mount_rooms(&server, &[1, 2]).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("listings.db");
    let config = site_config(&server.uri(), &db_path, "staleness-window-secs = 0", "");
    let coordinator = coordinator(&config);

    coordinator.run_all(&[]).await.unwrap();
    let second = coordinator.run_all(&[]).await.unwrap();

    let report = &second[0];
    assert_eq!(report.fresh, 0);
    assert_eq!(report.to_crawl, 2);
    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, 2);
    assert_eq!(report.identifiers_used, 0);

    let storage = coordinator.storage();
    let store = storage.lock().unwrap();
    let ids: Vec<i64> = store.list(COLLECTION).unwrap().iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![100, 101]);
}

#[tokio::test]
async fn test_vanished_listing_is_purged_and_its_identifier_reused() {
    let server = MockServer::start().await;
    mount_index(&server, &[1, 2, 3]).await;
    mount_rooms(&server, &[1, 2, 3]).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("listings.db");
    let config = site_config(&server.uri(), &db_path, "staleness-window-secs = 0", "");
    let coordinator = coordinator(&config);

    coordinator.run_all(&[]).await.unwrap();

    // Room 2 is delisted and room 4 appears
    server.reset().await;
    mount_index(&server, &[1, 3, 4]).await;
    mount_rooms(&server, &[1, 3, 4]).await;

    let second = coordinator.run_all(&[]).await.unwrap();
    let report = &second[0];
    assert_eq!(report.purged, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.updated, 2);

    let storage = coordinator.storage();
    let store = storage.lock().unwrap();
    assert!(store
        .find_by_link(COLLECTION, &room_url(&server, 2))
        .unwrap()
        .is_none());
    let room4 = store
        .find_by_link(COLLECTION, &room_url(&server, 4))
        .unwrap()
        .unwrap();
    assert_eq!(room4.id, 101);
    assert_eq!(store.count(COLLECTION).unwrap(), 3);
}

#[tokio::test]
async fn test_unreachable_result_page_purges_nothing() {
    let server = MockServer::start().await;
    let first_page = index_page(&[1]).replace(
        "</ul>",
        r#"</ul><a class="last" href="/search/page=2">2</a>"#,
    );
    Mock::given(method("GET"))
        .and(path("/search/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(first_page))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_rooms(&server, &[1]).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("listings.db");
    {
        let mut store = open_storage(&db_path).unwrap();
        store
            .insert(COLLECTION, 100, &ListingRecord::new(&room_url(&server, 1)), 0)
            .unwrap();
        store
            .insert(COLLECTION, 101, &ListingRecord::new(&room_url(&server, 2)), 0)
            .unwrap();
    }

    let config = site_config(&server.uri(), &db_path, "", "");
    let coordinator = coordinator(&config);

    let reports = coordinator.run_all(&[]).await.unwrap();
    let report = &reports[0];
    assert_eq!(report.failed_pages, vec![2]);
    assert_eq!(report.total_urls, 1);
    assert_eq!(report.purged, 0);
    assert_eq!(report.updated, 1);

    let storage = coordinator.storage();
    let store = storage.lock().unwrap();
    assert_eq!(store.count(COLLECTION).unwrap(), 2);
    let room2 = store
        .find_by_link(COLLECTION, &room_url(&server, 2))
        .unwrap()
        .unwrap();
    assert_eq!(room2.id, 101);
    let room1 = store
        .find_by_link(COLLECTION, &room_url(&server, 1))
        .unwrap()
        .unwrap();
    assert_eq!(room1.id, 100);
}

#[tokio::test]
async fn test_consecutive_failures_abort_the_run() {
    let server = MockServer::start().await;
    mount_index(&server, &[1, 2, 3, 4]).await;
    Mock::given(method("GET"))
        .and(path("/rooms/1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rooms/2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_rooms(&server, &[3, 4]).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("listings.db");
    let config = site_config(
        &server.uri(),
        &db_path,
        "max-consecutive-failures = 2",
        "",
    );
    let coordinator = coordinator(&config);

    let reports = coordinator.run_all(&[]).await.unwrap();
    let report = &reports[0];
    assert!(report.aborted());
    assert_eq!(report.failures, 2);
    assert_eq!(report.processed, 2);
    assert_eq!(report.inserted, 0);
    assert_eq!(report.batches_persisted, 0);

    let storage = coordinator.storage();
    let store = storage.lock().unwrap();
    assert_eq!(store.count(COLLECTION).unwrap(), 0);
    assert_eq!(store.latest_runs(1).unwrap()[0].status, RunStatus::Aborted);
}

#[tokio::test]
async fn test_gone_listings_are_skipped_without_aborting() {
    let server = MockServer::start().await;
    mount_index(&server, &[1, 2, 3]).await;
    Mock::given(method("GET"))
        .and(path("/rooms/1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rooms/2"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    mount_rooms(&server, &[3]).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("listings.db");
    let config = site_config(
        &server.uri(),
        &db_path,
        "max-consecutive-failures = 1",
        "",
    );
    let coordinator = coordinator(&config);

    let reports = coordinator.run_all(&[]).await.unwrap();
    let report = &reports[0];
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.gone, 2);
    assert_eq!(report.failures, 0);
    assert_eq!(report.inserted, 1);
}

#[tokio::test]
async fn test_listings_enriched_with_stations_and_district() {
    let server = MockServer::start().await;
    mount_index(&server, &[7]).await;
    mount_rooms(&server, &[7]).await;
    Mock::given(method("GET"))
        .and(path("/stations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "name": "恵比寿", "lines_info": [{ "name": "山手線" }] },
            { "name": "代官山", "lines_info": [{ "name": "東横線" }] }
        ])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("listings.db");
    let districts_path = dir.path().join("districts.json");
    std::fs::write(
        &districts_path,
        r#"{
          "prefectures": { "13": "東京都" },
          "cities": { "13113": "渋谷区" },
          "districts": [
            { "name": "恵比寿", "prefecture_id": 13, "city_id": 13113, "lat": 35.64, "lng": 139.71 },
            { "name": "札幌", "lat": 43.06, "lng": 141.35 }
          ]
        }"#,
    )
    .unwrap();

    let extra = format!(
        "[stations]\nendpoint = \"{}/stations\"\n\n[reference]\ndistricts-path = \"{}\"\n",
        server.uri(),
        districts_path.display()
    );
    let coordinator = coordinator(&site_config(&server.uri(), &db_path, "", &extra));

    let reports = coordinator.run_all(&[]).await.unwrap();
    assert_eq!(reports[0].inserted, 1);

    let storage = coordinator.storage();
    let store = storage.lock().unwrap();
    let listing = store
        .find_by_link(COLLECTION, &room_url(&server, 7))
        .unwrap()
        .unwrap();
    let record = &listing.record;
    assert_eq!(record.get_str("station_name_1"), Some("恵比寿"));
    assert_eq!(record.get_str("train_line_name_1"), Some("山手線"));
    assert_eq!(record.get_str("station_name_2"), Some("代官山"));
    assert_eq!(record.get_str("district"), Some("恵比寿"));
    assert_eq!(record.get_str("prefecture"), Some("東京都"));
    assert_eq!(record.get_str("city"), Some("渋谷区"));
}

#[tokio::test]
async fn test_empty_discovery_leaves_collection_untouched() {
    let server = MockServer::start().await;
    mount_index(&server, &[1]).await;
    mount_rooms(&server, &[1]).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("listings.db");
    let config = site_config(&server.uri(), &db_path, "staleness-window-secs = 0", "");
    let coordinator = coordinator(&config);
    coordinator.run_all(&[]).await.unwrap();

    server.reset().await;
    mount_index(&server, &[]).await;

    let reports = coordinator.run_all(&["tokyu".to_string()]).await.unwrap();
    assert_eq!(reports[0].total_urls, 0);
    assert_eq!(reports[0].purged, 0);

    let storage = coordinator.storage();
    let store = storage.lock().unwrap();
    assert_eq!(store.count(COLLECTION).unwrap(), 1);
}
