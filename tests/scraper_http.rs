mod common;

use common::{history_body, test_config};
use fund_datahub::errors::FundHubError;
use fund_datahub::models::fund::{DateRange, FetchRequest};
use fund_datahub::scrapers::base::FundScraper;
use fund_datahub::scrapers::eastmoney::EastmoneyScraper;
use chrono::NaiveDate;
use mockito::Matcher;
use std::time::Duration;

fn range() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
    )
    .unwrap()
}

#[tokio::test]
async fn sends_configured_headers_and_query() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/f10/lsjz")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("fundCode".into(), "000001".into()),
            Matcher::UrlEncoded("pageIndex".into(), "1".into()),
            Matcher::UrlEncoded("startDate".into(), "2024-01-01".into()),
            Matcher::UrlEncoded("endDate".into(), "2024-01-31".into()),
        ]))
        .match_header("user-agent", "fund-datahub-test")
        .match_header("referer", "http://fundf10.eastmoney.com/")
        .with_status(200)
        .with_body(history_body(&[("2024-01-02", Some("1.0010"))], 1))
        .expect(1)
        .create_async()
        .await;

    let scraper = EastmoneyScraper::new(&test_config(&server.url())).unwrap();
    let request = FetchRequest::new("000001").with_date_range(range());
    let pages = scraper.fetch_history(&request).await.unwrap();

    assert_eq!(pages.len(), 1);
    assert!(pages[0].contains("LSJZList"));
    mock.assert_async().await;
}

#[tokio::test]
async fn follows_pages_until_total_count() {
    let mut server = mockito::Server::new_async().await;
    let first = server
        .mock("GET", "/f10/lsjz")
        .match_query(Matcher::UrlEncoded("pageIndex".into(), "1".into()))
        .with_body(history_body(&[("2024-01-03", Some("1.02")), ("2024-01-02", Some("1.01"))], 3))
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("GET", "/f10/lsjz")
        .match_query(Matcher::UrlEncoded("pageIndex".into(), "2".into()))
        .with_body(history_body(&[("2024-01-01", Some("1.00"))], 3))
        .expect(1)
        .create_async()
        .await;

    let config = test_config(&server.url()).with_page_size(2);
    let scraper = EastmoneyScraper::new(&config).unwrap();
    let pages = scraper.fetch_history(&FetchRequest::new("000001")).await.unwrap();

    assert_eq!(pages.len(), 2);
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn short_pages_do_not_stop_paging_before_total_count() {
    let mut server = mockito::Server::new_async().await;
    // 服务端每页只返回 2 行，远小于请求的 pageSize
    let first = server
        .mock("GET", "/f10/lsjz")
        .match_query(Matcher::UrlEncoded("pageIndex".into(), "1".into()))
        .with_body(history_body(&[("2024-01-03", Some("1.02")), ("2024-01-02", Some("1.01"))], 3))
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("GET", "/f10/lsjz")
        .match_query(Matcher::UrlEncoded("pageIndex".into(), "2".into()))
        .with_body(history_body(&[("2024-01-01", Some("1.00"))], 3))
        .expect(1)
        .create_async()
        .await;

    let scraper = EastmoneyScraper::new(&test_config(&server.url())).unwrap();
    let pages = scraper.fetch_history(&FetchRequest::new("000001")).await.unwrap();

    assert_eq!(pages.len(), 2);
    assert!(pages[1].contains("2024-01-01"));
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn short_page_ends_paging_without_total_count() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/f10/lsjz")
        .match_query(Matcher::Any)
        .with_body(r#"jQuery({"Data":{"LSJZList":[{"FSRQ":"2024-01-02","DWJZ":"1.0"}]},"ErrCode":0})"#)
        .expect(1)
        .create_async()
        .await;

    let scraper = EastmoneyScraper::new(&test_config(&server.url())).unwrap();
    let pages = scraper.fetch_history(&FetchRequest::new("000001")).await.unwrap();

    assert_eq!(pages.len(), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn too_many_requests_is_rate_limited() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/f10/lsjz")
        .match_query(Matcher::Any)
        .with_status(429)
        .with_header("retry-after", "30")
        .create_async()
        .await;

    let scraper = EastmoneyScraper::new(&test_config(&server.url())).unwrap();
    let err = scraper.fetch_history(&FetchRequest::new("000001")).await.unwrap_err();

    match err {
        FundHubError::RateLimitedError { status, retry_after } => {
            assert_eq!(status, 429);
            assert_eq!(retry_after, Some(Duration::from_secs(30)));
        }
        other => panic!("expected rate limit, got {:?}", other),
    }
}

#[tokio::test]
async fn forbidden_is_rate_limited() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/f10/lsjz")
        .match_query(Matcher::Any)
        .with_status(403)
        .create_async()
        .await;

    let scraper = EastmoneyScraper::new(&test_config(&server.url())).unwrap();
    let err = scraper.fetch_history(&FetchRequest::new("000001")).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn server_error_is_a_network_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/f10/lsjz")
        .match_query(Matcher::Any)
        .with_status(502)
        .create_async()
        .await;

    let scraper = EastmoneyScraper::new(&test_config(&server.url())).unwrap();
    let err = scraper.fetch_history(&FetchRequest::new("000001")).await.unwrap_err();
    assert!(matches!(err, FundHubError::NetworkError(_)));
}

#[tokio::test]
async fn connection_refused_is_a_network_error() {
    let scraper = EastmoneyScraper::new(&test_config("http://127.0.0.1:1")).unwrap();
    let err = scraper.fetch_history(&FetchRequest::new("000001")).await.unwrap_err();
    assert!(err.is_retryable(), "{:?}", err);
}

#[tokio::test]
async fn fetches_quote() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/js/161725.js")
        .match_query(Matcher::Any)
        .with_body(r#"jsonpgz({"fundcode":"161725","name":"招商中证白酒指数(LOF)A","jzrq":"2024-05-10","dwjz":"1.0234","gsz":"1.0301","gszzl":"0.65","gztime":"2024-05-13 14:30"});"#)
        .create_async()
        .await;

    let scraper = EastmoneyScraper::new(&test_config(&server.url())).unwrap();
    let quote = scraper.fetch_quote("161725").await.unwrap();

    assert_eq!(quote.fund_id, "161725");
    assert_eq!(quote.name, "招商中证白酒指数(LOF)A");
    assert_eq!(quote.estimate_value.map(|d| d.to_string()), Some("1.0301".to_string()));
    mock.assert_async().await;
}

#[tokio::test]
async fn request_delay_spaces_requests() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/f10/lsjz")
        .match_query(Matcher::Any)
        .with_body(history_body(&[("2024-01-02", Some("1.0"))], 1))
        .expect(2)
        .create_async()
        .await;

    let config = test_config(&server.url()).with_request_delay(Duration::from_millis(200));
    let scraper = EastmoneyScraper::new(&config).unwrap();

    let started = std::time::Instant::now();
    scraper.fetch_history(&FetchRequest::new("000001")).await.unwrap();
    scraper.fetch_history(&FetchRequest::new("110022")).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));
}
