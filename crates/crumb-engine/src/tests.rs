//! Engine tests against an in-memory SQLite store, with a fault-injecting
//! wrapper for the degraded paths.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use crumb_core::{
  attribution::{AttributionModel, AttributionResult},
  event::{MatchMethod, Touchpoint},
  index::{IndexFamily, IndexRecord, RelatedAttributes},
  keys::KeySpace,
  progress::{Counters, JobKind, ResumeToken},
  store::{KvStore, SCAN_TERMINAL, ScanPage},
};
use crumb_store_sqlite::SqliteStore;
use serde_json::json;

use crate::{AttributionRequest, DateRange, Deadline, Engine, EngineConfig, Error, QueryType, indexer};

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn base() -> DateTime<Utc> { Utc.timestamp_opt(1_700_000_000, 0).unwrap() }

fn before(minutes: i64) -> DateTime<Utc> { base() - TimeDelta::minutes(minutes) }

async fn store() -> Arc<SqliteStore> {
  Arc::new(
    SqliteStore::open_in_memory()
      .await
      .expect("in-memory store"),
  )
}

fn config() -> EngineConfig {
  EngineConfig {
    scan_count: 3,
    ..Default::default()
  }
}

fn engine<S: KvStore>(store: Arc<S>, config: EngineConfig) -> Engine<S> {
  Engine::new(store, KeySpace::default(), config).expect("valid engine")
}

async fn seed_pageview(s: &SqliteStore, minutes_before: i64, session: &str, ip: &str, source: &str) {
  let ts = before(minutes_before);
  let value = json!({
    "timestamp": ts.to_rfc3339(),
    "session_id": session,
    "ip_address": ip,
    "landing_page": format!("/landing/{minutes_before}"),
    "source": source,
  });
  s.set(&format!("pageview:{}", ts.timestamp_millis()), &value.to_string())
    .await
    .unwrap();
}

async fn seed_conversion(
  s: &SqliteStore,
  email: &str,
  at: DateTime<Utc>,
  total: serde_json::Value,
  session: Option<&str>,
  ip: &str,
) {
  let value = json!({
    "timestamp": at.timestamp_millis(),
    "email": email,
    "order_total": total,
    "session_id": session,
    "ip_address": ip,
  });
  s.set(&format!("conversion:{}", at.timestamp_millis()), &value.to_string())
    .await
    .unwrap();
}

type IndexSnapshot =
  BTreeMap<String, (Vec<Touchpoint>, u64, RelatedAttributes, DateTime<Utc>, DateTime<Utc>)>;

/// Every index record in the store, minus the fields that differ between
/// builds (build id and write times).
async fn index_snapshot(s: &SqliteStore) -> IndexSnapshot {
  let keys = KeySpace::default();
  let mut out = BTreeMap::new();
  let mut cursor = SCAN_TERMINAL.to_owned();
  loop {
    let page: ScanPage = s.scan(&cursor, "pageview:*", 100).await.unwrap();
    for k in page.keys.iter().filter(|k| keys.parse_index_key(k).is_some()) {
      let raw = s.get(k).await.unwrap().unwrap();
      let rec: IndexRecord = serde_json::from_str(&raw).unwrap();
      out.insert(
        k.clone(),
        (
          rec.pageviews,
          rec.pageview_count,
          rec.related,
          rec.earliest_timestamp,
          rec.latest_timestamp,
        ),
      );
    }
    if page.is_terminal() {
      return out;
    }
    cursor = page.cursor;
  }
}

/// Every stored attribution result, with the computation time zeroed.
async fn attribution_snapshot(s: &SqliteStore) -> BTreeMap<String, AttributionResult> {
  let mut out = BTreeMap::new();
  let mut cursor = SCAN_TERMINAL.to_owned();
  loop {
    let page: ScanPage = s.scan(&cursor, "attribution:*", 100).await.unwrap();
    for k in &page.keys {
      let raw = s.get(k).await.unwrap().unwrap();
      let mut result: AttributionResult = serde_json::from_str(&raw).unwrap();
      result.computed_at = base();
      out.insert(k.clone(), result);
    }
    if page.is_terminal() {
      return out;
    }
    cursor = page.cursor;
  }
}

async fn seed_traffic(s: &SqliteStore) {
  for i in 0..12 {
    let session = format!("s{}", i % 3);
    let ip = if i % 2 == 0 { "10.0.0.1" } else { "10.0.0.2" };
    let source = ["google", "email", "ads"][i % 3];
    seed_pageview(s, 10 + i as i64 * 7, &session, ip, source).await;
  }
}

// ─── Fault injection ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum FaultError {
  #[error("injected failure")]
  Injected,
  #[error(transparent)]
  Store(#[from] crumb_store_sqlite::Error),
}

/// Keys are matched by prefix.
#[derive(Default)]
struct Faults {
  drop_writes_under: Option<&'static str>,
  slow_under:        Option<&'static str>,
  fail_under:        Option<&'static str>,
  delay:             Duration,
}

struct Faulty {
  inner:  Arc<SqliteStore>,
  faults: Faults,
}

fn under(prefix: Option<&str>, key: &str) -> bool { prefix.is_some_and(|p| key.starts_with(p)) }

impl Faulty {
  async fn before_call(&self, key: &str) -> Result<(), FaultError> {
    if under(self.faults.fail_under, key) {
      return Err(FaultError::Injected);
    }
    if under(self.faults.slow_under, key) {
      tokio::time::sleep(self.faults.delay).await;
    }
    Ok(())
  }

  fn drops(&self, key: &str) -> bool { under(self.faults.drop_writes_under, key) }
}

impl KvStore for Faulty {
  type Error = FaultError;

  async fn get(&self, key: &str) -> Result<Option<String>, FaultError> {
    self.before_call(key).await?;
    Ok(self.inner.get(key).await?)
  }

  async fn set(&self, key: &str, value: &str) -> Result<(), FaultError> {
    self.before_call(key).await?;
    if self.drops(key) {
      return Ok(());
    }
    Ok(self.inner.set(key, value).await?)
  }

  async fn setex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), FaultError> {
    self.before_call(key).await?;
    if self.drops(key) {
      return Ok(());
    }
    Ok(self.inner.setex(key, ttl_secs, value).await?)
  }

  async fn del(&self, key: &str) -> Result<bool, FaultError> {
    self.before_call(key).await?;
    Ok(self.inner.del(key).await?)
  }

  async fn scan(&self, cursor: &str, pattern: &str, count: usize) -> Result<ScanPage, FaultError> {
    Ok(self.inner.scan(cursor, pattern, count).await?)
  }
}

// ─── End to end ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_session_touchpoint_is_attributed() {
  let s = store().await;
  seed_pageview(&s, 120, "s1", "1.1.1.1", "google").await;
  seed_conversion(&s, "A@Example.com", base(), json!(100), Some("s1"), "1.1.1.1").await;

  let e = engine(s.clone(), config());
  let report = e.indexer().run(None, &Deadline::unbounded()).await.unwrap();
  assert!(report.is_complete);
  assert_eq!(report.processed_this_run, 1);
  assert!(report.next_resume_token.is_none());

  let key = format!("conversion:{}", base().timestamp_millis());
  let result = e.attributor().attribute_key(&key).await.unwrap().unwrap();

  // Found through both the session and the IP; the session match wins.
  assert_eq!(result.journey.len(), 1);
  assert_eq!(result.journey.touchpoints[0].match_method, MatchMethod::SessionMatch);
  for model in [
    AttributionModel::FirstClick,
    AttributionModel::LastClick,
    AttributionModel::Linear,
  ] {
    let m = result.models.get(model);
    assert_eq!(m.credits[0].source, "google");
    assert!((m.credits[0].credit - 100.0).abs() < 1e-9);
  }
  assert_eq!(result.confidence.score, 45);

  let stored = e
    .attributor()
    .load("a@example.com", base())
    .await
    .unwrap()
    .expect("stored result");
  assert_eq!(stored.journey, result.journey);
  assert_eq!(stored.conversion.email, "a@example.com");
}

#[tokio::test]
async fn zero_value_conversion_is_not_dropped() {
  let s = store().await;
  seed_pageview(&s, 30, "s1", "1.1.1.1", "google").await;
  seed_conversion(&s, "trial@example.com", base(), json!(0), Some("s1"), "1.1.1.1").await;
  seed_conversion(&s, "free@example.com", base() + TimeDelta::hours(1), json!(null), None, "9.9.9.9")
    .await;

  let e = engine(s.clone(), config());
  e.indexer().run(None, &Deadline::unbounded()).await.unwrap();
  let report = e
    .attributor()
    .run(&AttributionRequest::default(), &Deadline::unbounded())
    .await
    .unwrap();
  assert_eq!(report.created_this_run, 2);
  assert_eq!(report.failed_this_run, 0);

  let trial = e.attributor().load("trial@example.com", base()).await.unwrap().unwrap();
  assert_eq!(trial.conversion.order_total, 0.0);
  assert_eq!(trial.models.linear.total(), 0.0);
  assert!((trial.models.linear.credits[0].credit_percentage - 100.0).abs() < 1e-9);

  let free = e
    .attributor()
    .load("free@example.com", base() + TimeDelta::hours(1))
    .await
    .unwrap()
    .unwrap();
  assert!(free.journey.is_conversion_only());
  assert!(!free.conversion.attribution_found);
}

#[tokio::test]
async fn ipv6_addresses_index_and_match() {
  let s = store().await;
  seed_pageview(&s, 60, "", "2001:db8::1", "bing").await;
  seed_pageview(&s, 50, "", "2001:db8::2", "ads").await;
  seed_conversion(&s, "v6@example.com", base(), json!(10), None, "2001:db8::1").await;

  let e = engine(s.clone(), config());
  e.indexer().run(None, &Deadline::unbounded()).await.unwrap();

  let index_key = e.keys().index_key(IndexFamily::Ip, "2001:db8::1");
  assert_eq!(
    e.keys().parse_index_key(&index_key),
    Some((IndexFamily::Ip, "2001:db8::1".to_owned()))
  );
  assert!(s.get(&index_key).await.unwrap().is_some());

  let key = format!("conversion:{}", base().timestamp_millis());
  let result = e.attributor().attribute_key(&key).await.unwrap().unwrap();
  assert_eq!(result.journey.len(), 1);
  assert_eq!(result.journey.touchpoints[0].touchpoint.source, "bing");
  assert_eq!(
    result.journey.touchpoints[0].match_method,
    MatchMethod::PrimaryIpMatch
  );
}

// ─── Index build ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn index_build_resumed_in_slices_matches_single_pass() {
  let single = store().await;
  let sliced = store().await;
  seed_traffic(&single).await;
  seed_traffic(&sliced).await;

  let report = engine(single.clone(), config())
    .indexer()
    .run(None, &Deadline::unbounded())
    .await
    .unwrap();
  assert!(report.is_complete);
  assert_eq!(report.processed_this_run, 12);

  // A zero budget does one scan page per invocation.
  let e = engine(sliced.clone(), config());
  let mut invocations = 0;
  let mut processed = 0;
  loop {
    let report = e
      .indexer()
      .run(None, &Deadline::new(Duration::ZERO, Duration::ZERO))
      .await
      .unwrap();
    invocations += 1;
    processed += report.processed_this_run;
    assert!(report.processed_this_run <= 3);
    if report.is_complete {
      assert_eq!(report.total_progress.processed, 12);
      break;
    }
    assert!(report.next_resume_token.is_some());
    assert!(invocations < 100, "index build never completed");
  }
  assert!(invocations > 4);
  assert_eq!(processed, 12);

  let a = index_snapshot(&single).await;
  let b = index_snapshot(&sliced).await;
  assert!(!a.is_empty());
  assert_eq!(a, b);
}

#[tokio::test]
async fn derived_keys_are_not_indexed() {
  let s = store().await;
  seed_traffic(&s).await;
  for key in [
    "pageview:session:s9",
    "pageview:ip:10.0.0.9",
    "pageview:meta",
    "pageview:17:progress",
    "pageview:landing:%2F",
  ] {
    s.set(key, r#"{"timestamp": 1700000000, "ip_address": "6.6.6.6"}"#)
      .await
      .unwrap();
  }

  let e = engine(s.clone(), config());
  let report = e.indexer().run(None, &Deadline::unbounded()).await.unwrap();
  assert_eq!(report.processed_this_run, 12);
  let ip = e.keys().index_key(IndexFamily::Ip, "6.6.6.6");
  assert!(s.get(&ip).await.unwrap().is_none());
}

#[tokio::test]
async fn rebuild_replaces_instead_of_doubling() {
  let s = store().await;
  seed_traffic(&s).await;
  let e = engine(s.clone(), config());

  e.indexer().run(None, &Deadline::unbounded()).await.unwrap();
  let first = index_snapshot(&s).await;

  // A completed build is not resumed; the next run is a new build.
  let report = e.indexer().run(None, &Deadline::unbounded()).await.unwrap();
  assert_eq!(report.processed_this_run, 12);
  assert_eq!(report.total_progress.processed, 12);
  assert_eq!(index_snapshot(&s).await, first);
}

#[tokio::test]
async fn unreadable_progress_starts_over() {
  let s = store().await;
  seed_traffic(&s).await;
  let e = engine(s.clone(), config());
  let job_key = e.keys().progress_key(indexer::JOB);
  s.set(&job_key, "{ not json").await.unwrap();

  let report = e.indexer().run(None, &Deadline::unbounded()).await.unwrap();
  assert!(report.is_complete);
  let stored = e.progress().load(&job_key).await.unwrap().unwrap();
  assert_eq!(stored.kind, JobKind::IndexBuild);
  assert!(stored.is_complete());
}

#[tokio::test]
async fn percent_encoded_records_are_indexed() {
  let s = store().await;
  let ts = before(15);
  let encoded = "%7B%22timestamp%22%3A%22".to_owned()
    + &ts.to_rfc3339().replace(':', "%3A").replace('+', "%2B")
    + "%22%2C%22ip_address%22%3A%225.5.5.5%22%7D";
  s.set(&format!("pageview:{}", ts.timestamp_millis()), &encoded)
    .await
    .unwrap();

  let e = engine(s.clone(), config());
  let report = e.indexer().run(None, &Deadline::unbounded()).await.unwrap();
  assert_eq!(report.failed_this_run, 0);
  let ip = e.keys().index_key(IndexFamily::Ip, "5.5.5.5");
  let rec: IndexRecord = serde_json::from_str(&s.get(&ip).await.unwrap().unwrap()).unwrap();
  assert_eq!(rec.pageview_count, 1);
  assert_eq!(rec.pageviews[0].timestamp, ts);
}

// ─── Bulk attribution ────────────────────────────────────────────────────────

async fn seed_conversions(s: &SqliteStore, n: i64) {
  for i in 0..n {
    let at = base() + TimeDelta::hours(i);
    seed_conversion(s, &format!("c{i}@example.com"), at, json!(i * 10), Some("s0"), "10.0.0.1").await;
  }
}

#[tokio::test]
async fn pending_skips_already_attributed() {
  let s = store().await;
  seed_traffic(&s).await;
  seed_conversions(&s, 3).await;
  let e = engine(s.clone(), config());
  e.indexer().run(None, &Deadline::unbounded()).await.unwrap();

  let first = e
    .attributor()
    .run(&AttributionRequest::default(), &Deadline::unbounded())
    .await
    .unwrap();
  assert!(first.is_complete);
  assert_eq!(first.created_this_run, 3);
  assert_eq!(first.total_items, Some(3));

  let second = e
    .attributor()
    .run(&AttributionRequest::default(), &Deadline::unbounded())
    .await
    .unwrap();
  assert_eq!(second.created_this_run, 0);
  assert_eq!(second.skipped_this_run, 3);

  let all = e
    .attributor()
    .run(
      &AttributionRequest {
        query_type: QueryType::All,
        ..Default::default()
      },
      &Deadline::unbounded(),
    )
    .await
    .unwrap();
  assert_eq!(all.created_this_run, 3);
}

#[tokio::test]
async fn bulk_attribution_resumed_in_slices_matches_single_pass() {
  let single = store().await;
  let sliced = store().await;
  for s in [&single, &sliced] {
    seed_traffic(s).await;
    seed_conversions(s, 5).await;
    engine(s.clone(), config())
      .indexer()
      .run(None, &Deadline::unbounded())
      .await
      .unwrap();
  }

  let report = engine(single.clone(), config())
    .attributor()
    .run(&AttributionRequest::default(), &Deadline::unbounded())
    .await
    .unwrap();
  assert!(report.is_complete);
  assert_eq!(report.created_this_run, 5);

  // A zero budget does one scan page per invocation.
  let e = engine(sliced.clone(), config());
  let zero = Deadline::new(Duration::ZERO, Duration::ZERO);
  let mut invocations = 0;
  let mut created = 0;
  loop {
    let report = e.attributor().run(&AttributionRequest::default(), &zero).await.unwrap();
    invocations += 1;
    created += report.created_this_run;
    assert!(report.processed_this_run <= 3);
    if report.is_complete {
      assert_eq!(report.total_progress.created, 5);
      assert_eq!(report.total_items, Some(5));
      break;
    }
    let token: ResumeToken = report.next_resume_token.as_deref().unwrap().parse().unwrap();
    assert!(matches!(token, ResumeToken::Cursor { .. }));
    assert!(invocations < 100, "bulk attribution never completed");
  }
  assert!(invocations > 2);
  assert_eq!(created, 5);

  let a = attribution_snapshot(&single).await;
  let b = attribution_snapshot(&sliced).await;
  assert_eq!(a.len(), 5);
  assert!(a.values().any(|r| !r.journey.is_conversion_only()));
  assert_eq!(a, b);
}

#[tokio::test]
async fn bulk_attribution_finishes_under_a_page_cap() {
  let s = store().await;
  seed_traffic(&s).await;
  seed_conversions(&s, 4).await;
  let e = engine(s.clone(), EngineConfig {
    max_pages_per_run: 2,
    ..config()
  });
  e.indexer()
    .run(None, &Deadline::unbounded())
    .await
    .unwrap();

  // The conversion scan walks far more than two pages of keys, so no single
  // invocation can finish; each one has to move the cursor forward.
  let mut last_token = None;
  let mut invocations = 0;
  let report = loop {
    let report = e
      .attributor()
      .run(&AttributionRequest::default(), &Deadline::unbounded())
      .await
      .unwrap();
    invocations += 1;
    if report.is_complete {
      break report;
    }
    assert_ne!(report.next_resume_token, last_token, "cursor did not move");
    last_token = report.next_resume_token;
    assert!(invocations < 200, "bulk attribution never completed");
  };
  assert!(invocations > 1);
  assert_eq!(report.total_progress.created, 4);
  assert_eq!(report.total_items, Some(4));
  for i in 0..4 {
    let at = base() + TimeDelta::hours(i);
    assert!(
      e.attributor()
        .load(&format!("c{i}@example.com"), at)
        .await
        .unwrap()
        .is_some()
    );
  }
}

#[tokio::test]
async fn limit_and_explicit_resume() {
  let s = store().await;
  seed_conversions(&s, 4).await;
  let e = engine(s.clone(), config());

  let limited = e
    .attributor()
    .run(
      &AttributionRequest {
        limit: Some(1),
        ..Default::default()
      },
      &Deadline::unbounded(),
    )
    .await
    .unwrap();
  assert_eq!(limited.processed_this_run, 1);
  assert!(!limited.is_complete);
  let token: ResumeToken = limited.next_resume_token.as_deref().unwrap().parse().unwrap();

  let rest = e
    .attributor()
    .run(
      &AttributionRequest {
        resume: Some(token),
        ..Default::default()
      },
      &Deadline::unbounded(),
    )
    .await
    .unwrap();
  assert_eq!(rest.processed_this_run, 3);
  assert!(rest.is_complete);
  assert_eq!(rest.total_progress.created, 4);
  assert_eq!(rest.total_items, Some(4));

  for bad in [
    ResumeToken::Offset { offset: 0 },
    ResumeToken::Cursor {
      pattern_index: 99,
      cursor:        "0".into(),
    },
  ] {
    let res = e
      .attributor()
      .run(
        &AttributionRequest {
          resume: Some(bad),
          ..Default::default()
        },
        &Deadline::unbounded(),
      )
      .await;
    assert!(matches!(res, Err(Error::Core(_))));
  }
}

#[tokio::test]
async fn date_range_filters_conversions() {
  let s = store().await;
  seed_conversions(&s, 4).await;
  let e = engine(s.clone(), config());

  let report = e
    .attributor()
    .run(
      &AttributionRequest {
        date_range: DateRange {
          from: Some(base() + TimeDelta::hours(1)),
          to:   Some(base() + TimeDelta::hours(3)),
        },
        ..Default::default()
      },
      &Deadline::unbounded(),
    )
    .await
    .unwrap();
  assert_eq!(report.created_this_run, 2);
  assert_eq!(report.skipped_this_run, 2);
  assert!(e.attributor().load("c0@example.com", base()).await.unwrap().is_none());
  assert!(
    e.attributor()
      .load("c1@example.com", base() + TimeDelta::hours(1))
      .await
      .unwrap()
      .is_some()
  );
}

// ─── Degraded stores ─────────────────────────────────────────────────────────

#[tokio::test]
async fn dropped_result_writes_abort_the_job() {
  let s = store().await;
  seed_conversions(&s, 2).await;
  let faulty = Arc::new(Faulty {
    inner:  s.clone(),
    faults: Faults {
      drop_writes_under: Some("attribution:"),
      ..Default::default()
    },
  });
  let e = engine(faulty, config());

  let key = format!("conversion:{}", base().timestamp_millis());
  let single = e.attributor().attribute_key(&key).await;
  assert!(matches!(single, Err(Error::WriteVerification { .. })));

  let bulk = e
    .attributor()
    .run(&AttributionRequest::default(), &Deadline::unbounded())
    .await;
  assert!(matches!(bulk, Err(Error::WriteVerification { .. })));

  // The failed page was not recorded as done.
  let job_key = e.keys().progress_key(&AttributionRequest::default().job_name());
  let progress = e.progress().load(&job_key).await.unwrap().unwrap();
  assert_eq!(progress.token, ResumeToken::scan_start());
  assert!(!progress.is_complete());
}

#[tokio::test]
async fn retried_aborts_do_not_inflate_counters() {
  let s = store().await;
  seed_conversions(&s, 2).await;
  let faulty = Arc::new(Faulty {
    inner:  s.clone(),
    faults: Faults {
      drop_writes_under: Some("attribution:"),
      ..Default::default()
    },
  });
  let e = engine(faulty, config());

  for _ in 0..3 {
    let res = e
      .attributor()
      .run(&AttributionRequest::default(), &Deadline::unbounded())
      .await;
    assert!(matches!(res, Err(Error::WriteVerification { .. })));
  }

  let job_key = e.keys().progress_key(&AttributionRequest::default().job_name());
  let progress = e.progress().load(&job_key).await.unwrap().unwrap();
  assert_eq!(progress.token, ResumeToken::scan_start());
  assert_eq!(progress.counters, Counters::default());
}

#[tokio::test]
async fn dropped_progress_writes_abort_the_job() {
  let s = store().await;
  seed_traffic(&s).await;
  let faulty = Arc::new(Faulty {
    inner:  s.clone(),
    faults: Faults {
      drop_writes_under: Some("progress:"),
      ..Default::default()
    },
  });
  let e = engine(faulty, config());
  let res = e.indexer().run(None, &Deadline::unbounded()).await;
  assert!(matches!(res, Err(Error::WriteVerification { .. })));
}

#[tokio::test]
async fn slow_and_failing_lookups_degrade_the_journey() {
  let s = store().await;
  seed_pageview(&s, 90, "s1", "1.1.1.1", "google").await;
  seed_pageview(&s, 60, "s2", "2.2.2.2", "email").await;
  engine(s.clone(), config())
    .indexer()
    .run(None, &Deadline::unbounded())
    .await
    .unwrap();

  let conversion = crumb_core::normalize::conversion(&json!({
    "timestamp": base().to_rfc3339(),
    "email": "x@example.com",
    "order_total": 50,
    "session_id": "s1",
    "primary_ip": "2.2.2.2",
  }))
  .unwrap();

  let slow = Arc::new(Faulty {
    inner:  s.clone(),
    faults: Faults {
      slow_under: Some("pageview:ip:"),
      delay: Duration::from_millis(500),
      ..Default::default()
    },
  });
  let e = engine(slow, EngineConfig {
    call_timeout_ms: 50,
    ..config()
  });
  let journey = e.reconstructor().reconstruct(&conversion).await;
  assert_eq!(journey.len(), 1);
  assert_eq!(journey.touchpoints[0].touchpoint.source, "google");

  let failing = Arc::new(Faulty {
    inner:  s.clone(),
    faults: Faults {
      fail_under: Some("pageview:"),
      ..Default::default()
    },
  });
  let e = engine(failing, config());
  let journey = e.reconstructor().reconstruct(&conversion).await;
  assert!(journey.is_conversion_only());

  // Every lookup failing still yields a stored, direct-credited result.
  let result = e.attributor().attribute(&conversion).await.unwrap();
  assert_eq!(result.models.first_click.credits[0].source, "direct");
  assert!(!result.conversion.attribution_found);
}

#[tokio::test]
async fn failing_index_groups_are_counted_not_fatal() {
  let s = store().await;
  seed_traffic(&s).await;
  let faulty = Arc::new(Faulty {
    inner:  s.clone(),
    faults: Faults {
      fail_under: Some("pageview:ip:"),
      ..Default::default()
    },
  });
  let e = engine(faulty, config());
  let report = e.indexer().run(None, &Deadline::unbounded()).await.unwrap();
  assert!(report.is_complete);
  assert!(report.failed_this_run > 0);
  assert!(report.created_this_run > 0);
  let session = e.keys().index_key(IndexFamily::Session, "s0");
  assert!(s.get(&session).await.unwrap().is_some());
}
