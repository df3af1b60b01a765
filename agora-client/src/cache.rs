use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    api::{ParentKey, Reply, ReplyId},
    Error,
};

/// All the replies loaded so far, bucketed by parent
///
/// A missing bucket means "not loaded yet", which is different from an empty
/// bucket. Any given reply lives in at most one bucket. Buckets are shared and
/// copied on write, so cloning the cache is cheap.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReplyTreeCache {
    buckets: HashMap<ParentKey, Arc<Vec<Reply>>>,
}

impl ReplyTreeCache {
    pub fn new() -> ReplyTreeCache {
        ReplyTreeCache::default()
    }

    pub fn get(&self, key: &ParentKey) -> Option<&[Reply]> {
        self.buckets.get(key).map(|b| &b[..])
    }

    pub fn is_loaded(&self, key: &ParentKey) -> bool {
        self.buckets.contains_key(key)
    }

    /// Replace the bucket for `key` with freshly fetched replies
    pub fn put(&mut self, key: ParentKey, items: Vec<Reply>) {
        let ids = items.iter().map(|r| r.id.clone()).collect::<HashSet<_>>();
        self.evict_elsewhere(&ids, &key);
        tracing::debug!(parent = ?key, num_replies = items.len(), "storing replies bucket");
        self.buckets.insert(key, Arc::new(items));
    }

    /// Add a newly created reply at the end of an already-loaded bucket
    pub fn append(&mut self, key: &ParentKey, reply: Reply) -> Result<(), Error> {
        if !self.buckets.contains_key(key) {
            return Err(Error::Precomposition(key.clone()));
        }
        let mut ids = HashSet::new();
        ids.insert(reply.id.clone());
        self.evict_elsewhere(&ids, key);
        let bucket = self
            .buckets
            .get_mut(key)
            .ok_or_else(|| Error::Precomposition(key.clone()))?;
        let bucket = Arc::make_mut(bucket);
        match bucket.iter_mut().find(|r| r.id == reply.id) {
            // a refetch already brought it in
            Some(existing) => *existing = reply,
            None => bucket.push(reply),
        }
        Ok(())
    }

    /// Replace reply `rid` by `updater(rid)`, keeping its position
    ///
    /// Returns the updated reply, or `None` if `rid` is not loaded.
    pub fn mutate<F>(&mut self, rid: &ReplyId, updater: F) -> Option<&Reply>
    where
        F: FnOnce(&Reply) -> Reply,
    {
        let (key, idx) = self.locate(rid)?;
        let bucket = Arc::make_mut(self.buckets.get_mut(&key)?);
        let updated = updater(&bucket[idx]);
        debug_assert_eq!(updated.id, *rid, "mutate must not change a reply's id");
        bucket[idx] = updated;
        Some(&bucket[idx])
    }

    /// Drop the buckets of all of `roots`, and remove `roots` from every bucket
    pub fn remove_subtree(&mut self, roots: &HashSet<ReplyId>) {
        self.buckets.retain(|key, _| match key {
            ParentKey::Root => true,
            ParentKey::Reply(id) => !roots.contains(id),
        });
        for bucket in self.buckets.values_mut() {
            if bucket.iter().any(|r| roots.contains(&r.id)) {
                Arc::make_mut(bucket).retain(|r| !roots.contains(&r.id));
            }
        }
    }

    pub fn find(&self, rid: &ReplyId) -> Option<&Reply> {
        self.replies().find(|r| r.id == *rid)
    }

    pub fn contains(&self, rid: &ReplyId) -> bool {
        self.find(rid).is_some()
    }

    /// All loaded replies, in no particular order
    pub fn replies(&self) -> impl Iterator<Item = &Reply> {
        self.buckets.values().flat_map(|b| b.iter())
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&ParentKey, &[Reply])> {
        self.buckets.iter().map(|(k, b)| (k, &b[..]))
    }

    /// Number of loaded replies
    pub fn len(&self) -> usize {
        self.buckets.values().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn locate(&self, rid: &ReplyId) -> Option<(ParentKey, usize)> {
        self.buckets.iter().find_map(|(key, bucket)| {
            bucket
                .iter()
                .position(|r| r.id == *rid)
                .map(|idx| (key.clone(), idx))
        })
    }

    fn evict_elsewhere(&mut self, ids: &HashSet<ReplyId>, keep: &ParentKey) {
        for (key, bucket) in self.buckets.iter_mut() {
            if key != keep && bucket.iter().any(|r| ids.contains(&r.id)) {
                tracing::warn!(parent = ?key, "reply moved to another parent, evicting stale copy");
                Arc::make_mut(bucket).retain(|r| !ids.contains(&r.id));
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    pub(crate) fn reply(id: &str, parent: Option<&str>, likes: u64) -> Reply {
        Reply {
            id: ReplyId::from(id),
            parent_id: parent.map(ReplyId::from),
            author_name: String::from("alice"),
            body: format!("body of {id}"),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            like_count: likes,
            liked_by_me: None,
        }
    }

    fn key(id: &str) -> ParentKey {
        ParentKey::Reply(ReplyId::from(id))
    }

    fn ids(bucket: Option<&[Reply]>) -> Vec<&str> {
        bucket
            .expect("bucket is not loaded")
            .iter()
            .map(|r| &r.id.0 as &str)
            .collect()
    }

    #[test]
    fn absent_is_not_empty() {
        let mut cache = ReplyTreeCache::new();
        assert_eq!(cache.get(&key("r1")), None);
        assert!(!cache.is_loaded(&key("r1")));
        cache.put(key("r1"), Vec::new());
        assert_eq!(cache.get(&key("r1")), Some(&[][..]));
        assert!(cache.is_loaded(&key("r1")));
    }

    #[test]
    fn put_replaces_wholesale() {
        let mut cache = ReplyTreeCache::new();
        cache.put(ParentKey::Root, vec![reply("r1", None, 0), reply("r2", None, 0)]);
        cache.put(ParentKey::Root, vec![reply("r3", None, 0)]);
        assert_eq!(ids(cache.get(&ParentKey::Root)), vec!["r3"]);
    }

    #[test]
    fn put_keeps_reply_in_a_single_bucket() {
        let mut cache = ReplyTreeCache::new();
        cache.put(ParentKey::Root, vec![reply("r1", None, 0), reply("r2", None, 0)]);
        cache.put(key("r1"), vec![reply("r2", Some("r1"), 0)]);
        assert_eq!(ids(cache.get(&ParentKey::Root)), vec!["r1"]);
        assert_eq!(ids(cache.get(&key("r1"))), vec!["r2"]);
    }

    #[test]
    fn append_needs_loaded_bucket() {
        let mut cache = ReplyTreeCache::new();
        assert_eq!(
            cache.append(&key("r1"), reply("r2", Some("r1"), 0)),
            Err(Error::Precomposition(key("r1"))),
        );
        assert!(cache.is_empty());

        cache.put(key("r1"), vec![reply("r2", Some("r1"), 0)]);
        cache
            .append(&key("r1"), reply("r3", Some("r1"), 0))
            .expect("appending to loaded bucket");
        assert_eq!(ids(cache.get(&key("r1"))), vec!["r2", "r3"]);
    }

    #[test]
    fn append_does_not_duplicate() {
        let mut cache = ReplyTreeCache::new();
        cache.put(ParentKey::Root, vec![reply("r1", None, 0)]);
        cache
            .append(&ParentKey::Root, reply("r1", None, 4))
            .expect("appending to root");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.find(&ReplyId::from("r1")).unwrap().like_count, 4);
    }

    #[test]
    fn mutate_keeps_order_and_identity() {
        let mut cache = ReplyTreeCache::new();
        cache.put(
            ParentKey::Root,
            vec![reply("r1", None, 0), reply("r2", None, 5), reply("r3", None, 0)],
        );
        let updated = cache
            .mutate(&ReplyId::from("r2"), |r| Reply {
                like_count: r.like_count + 1,
                ..r.clone()
            })
            .expect("r2 is loaded");
        assert_eq!(updated.like_count, 6);
        assert_eq!(ids(cache.get(&ParentKey::Root)), vec!["r1", "r2", "r3"]);
        assert!(cache.mutate(&ReplyId::from("nope"), |r| r.clone()).is_none());
    }

    #[test]
    fn mutate_copies_on_write() {
        let mut cache = ReplyTreeCache::new();
        cache.put(ParentKey::Root, vec![reply("r1", None, 1)]);
        let snapshot = cache.clone();
        cache.mutate(&ReplyId::from("r1"), |r| Reply {
            like_count: 2,
            ..r.clone()
        });
        assert_eq!(snapshot.find(&ReplyId::from("r1")).unwrap().like_count, 1);
        assert_eq!(cache.find(&ReplyId::from("r1")).unwrap().like_count, 2);
    }

    #[test]
    fn remove_subtree_drops_buckets_and_elements() {
        let mut cache = ReplyTreeCache::new();
        cache.put(ParentKey::Root, vec![reply("r1", None, 0), reply("r4", None, 0)]);
        cache.put(key("r1"), vec![reply("r2", Some("r1"), 0)]);
        cache.put(key("r2"), vec![reply("r3", Some("r2"), 0)]);
        cache.put(key("r4"), vec![reply("r5", Some("r4"), 0)]);

        let roots = ["r1", "r2", "r3"].into_iter().map(ReplyId::from).collect();
        cache.remove_subtree(&roots);

        assert_eq!(ids(cache.get(&ParentKey::Root)), vec!["r4"]);
        assert_eq!(cache.get(&key("r1")), None);
        assert_eq!(cache.get(&key("r2")), None);
        assert_eq!(ids(cache.get(&key("r4"))), vec!["r5"]);
        assert_eq!(cache.len(), 2);
    }
}
