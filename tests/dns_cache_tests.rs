use sentrynet_core::cache::{CacheKey, DnsCache, InMemoryRecordStore};
use sentrynet_core::dns::{DnsPacket, DnsRecord, DnsResourceClass, DnsResourceType};
use std::sync::Arc;

fn answer_for(fqdn: &str) -> DnsPacket {
    let query = DnsPacket::new_query(1, fqdn, DnsResourceType::A);
    let mut response = DnsPacket::response_shell(&query);
    response.answers.push(DnsRecord::a(fqdn, 300, "93.184.216.34".parse().unwrap()));
    response
}

#[tokio::test]
async fn a_freshly_cached_answer_is_returned_on_the_next_lookup() {
    let cache = DnsCache::new(Arc::new(InMemoryRecordStore::new()));
    let key = CacheKey::new("example.com.", DnsResourceType::A, DnsResourceClass::IN);

    assert!(cache.get(&key).await.is_none());

    let stored = cache.put(key.clone(), answer_for("example.com."), false, false);
    assert!(stored);

    let entry = cache.get(&key).await.expect("just-written entry should be cached");
    assert_eq!(entry.answer.answers.len(), 1);
}

#[tokio::test]
async fn lookups_are_keyed_by_normalised_fqdn_case_and_type() {
    let cache = DnsCache::new(Arc::new(InMemoryRecordStore::new()));
    let lower = CacheKey::new("example.com.", DnsResourceType::A, DnsResourceClass::IN);
    let mixed = CacheKey::new("ExAmPlE.CoM.", DnsResourceType::A, DnsResourceClass::IN);

    cache.put(lower.clone(), answer_for("example.com."), false, false);
    assert!(cache.get(&mixed).await.is_some());

    let aaaa = CacheKey::new("example.com.", DnsResourceType::AAAA, DnsResourceClass::IN);
    assert!(cache.get(&aaaa).await.is_none());
}
