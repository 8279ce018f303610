//! Journey reconstruction from the pageview indexes.

use crumb_core::{
  event::{Conversion, MatchMethod},
  index::{IndexFamily, IndexRecord},
  journey::{self, CustomerJourney, StagedLookup},
  keys::KeySpace,
  store::KvStore,
};

use crate::client::KvClient;

pub struct JourneyReconstructor<'a, S> {
  client: &'a KvClient<S>,
  keys:   &'a KeySpace,
}

impl<'a, S: KvStore> JourneyReconstructor<'a, S> {
  pub fn new(client: &'a KvClient<S>, keys: &'a KeySpace) -> Self { Self { client, keys } }

  /// Look up every index the conversion can be matched through and merge
  /// the hits. The lookups run concurrently. Any one of them failing only
  /// removes its contribution; the worst case is a conversion-only journey.
  pub async fn reconstruct(&self, conversion: &Conversion) -> CustomerJourney {
    let session = self.lookup(
      IndexFamily::Session,
      conversion.session_id.as_deref(),
      MatchMethod::SessionMatch,
    );
    let primary_ip = self.lookup(
      IndexFamily::Ip,
      conversion.primary_ip.as_deref(),
      MatchMethod::PrimaryIpMatch,
    );
    let conversion_ip = self.lookup(
      IndexFamily::Ip,
      conversion.distinct_conversion_ip(),
      MatchMethod::ConversionIpMatch,
    );
    let (session, primary_ip, conversion_ip) = tokio::join!(session, primary_ip, conversion_ip);

    let staged: Vec<StagedLookup> = [session, primary_ip, conversion_ip]
      .into_iter()
      .flatten()
      .collect();
    let journey = journey::assemble(staged, conversion.timestamp);
    tracing::debug!(
      email = %conversion.email,
      touchpoints = journey.len(),
      methods = ?journey.methods(),
      "journey reconstructed"
    );
    journey
  }

  async fn lookup(
    &self,
    family: IndexFamily,
    value: Option<&str>,
    method: MatchMethod,
  ) -> Option<StagedLookup> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    let key = self.keys.index_key(family, value);
    match self.client.get_json::<IndexRecord>(&key).await {
      Ok(Some(record)) => Some(StagedLookup {
        method,
        pageviews: record.pageviews,
      }),
      Ok(None) => None,
      Err(e) => {
        tracing::warn!(key, %method, error = %e, "index lookup failed; continuing without it");
        None
      }
    }
  }
}
