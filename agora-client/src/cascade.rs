use std::collections::HashSet;

use crate::{
    api::{ParentKey, ReplyId},
    ReplyTreeCache,
};

/// Finds everything that goes away with a deleted reply
///
/// The store deletes descendants by itself, so this only has to mirror that
/// locally, and only for what is loaded.
pub struct CascadeDeleteResolver;

impl CascadeDeleteResolver {
    /// `rid` and all its loaded descendants
    ///
    /// Scans the whole cache until a pass adds nothing new. The cache only ever
    /// holds what the user expanded, so this stays small.
    // TODO: keep a parent -> children index if views with thousands of loaded replies show up
    pub fn closure(cache: &ReplyTreeCache, rid: &ReplyId) -> HashSet<ReplyId> {
        let mut closure = HashSet::new();
        closure.insert(rid.clone());
        loop {
            let mut added = false;
            for (key, bucket) in cache.buckets() {
                let bucket_doomed = match key {
                    ParentKey::Root => false,
                    ParentKey::Reply(parent) => closure.contains(parent),
                };
                for r in bucket {
                    let doomed = bucket_doomed
                        || r.parent_id.as_ref().map_or(false, |p| closure.contains(p));
                    if doomed && !closure.contains(&r.id) {
                        closure.insert(r.id.clone());
                        added = true;
                    }
                }
            }
            if !added {
                return closure;
            }
        }
    }

    /// Remove `rid` and all its loaded descendants from `cache`
    ///
    /// Returns the removed ids.
    pub fn purge(cache: &mut ReplyTreeCache, rid: &ReplyId) -> HashSet<ReplyId> {
        let closure = Self::closure(cache, rid);
        tracing::debug!(?rid, num_removed = closure.len(), "purging reply subtree");
        cache.remove_subtree(&closure);
        closure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::{ParentKey, Reply},
        cache::tests::reply,
    };
    use std::collections::{BTreeMap, HashMap};

    fn ids(names: &[&str]) -> HashSet<ReplyId> {
        names.iter().copied().map(ReplyId::from).collect()
    }

    fn key(id: &str) -> ParentKey {
        ParentKey::Reply(ReplyId::from(id))
    }

    fn example_cache() -> ReplyTreeCache {
        // root: a, e
        // a: b, c
        // c: d
        // e: f
        let mut cache = ReplyTreeCache::new();
        cache.put(ParentKey::Root, vec![reply("a", None, 0), reply("e", None, 0)]);
        cache.put(key("a"), vec![reply("b", Some("a"), 0), reply("c", Some("a"), 0)]);
        cache.put(key("c"), vec![reply("d", Some("c"), 0)]);
        cache.put(key("e"), vec![reply("f", Some("e"), 0)]);
        cache.put(key("b"), Vec::new());
        cache
    }

    #[test]
    fn closure_is_transitive() {
        let cache = example_cache();
        assert_eq!(
            CascadeDeleteResolver::closure(&cache, &ReplyId::from("a")),
            ids(&["a", "b", "c", "d"]),
        );
        assert_eq!(
            CascadeDeleteResolver::closure(&cache, &ReplyId::from("d")),
            ids(&["d"]),
        );
        // unknown ids are their own closure
        assert_eq!(
            CascadeDeleteResolver::closure(&cache, &ReplyId::from("zz")),
            ids(&["zz"]),
        );
    }

    #[test]
    fn purge_leaves_other_buckets_alone() {
        let mut cache = example_cache();
        let before = cache.clone();
        let removed = CascadeDeleteResolver::purge(&mut cache, &ReplyId::from("a"));
        assert_eq!(removed, ids(&["a", "b", "c", "d"]));
        for k in [key("a"), key("b"), key("c")] {
            assert_eq!(cache.get(&k), None);
        }
        assert_eq!(cache.get(&key("e")), before.get(&key("e")));
        let root = cache.get(&ParentKey::Root).expect("root is loaded");
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].id, ReplyId::from("e"));
    }

    #[test]
    fn bucket_key_alone_is_enough() {
        // a reply whose parent_id was not filled in is still removed along with
        // the bucket it sits in
        let mut cache = ReplyTreeCache::new();
        cache.put(ParentKey::Root, vec![reply("a", None, 0)]);
        cache.put(key("a"), vec![reply("b", None, 0)]);
        cache.put(key("b"), vec![reply("c", Some("b"), 0)]);
        assert_eq!(
            CascadeDeleteResolver::closure(&cache, &ReplyId::from("a")),
            ids(&["a", "b", "c"]),
        );
    }

    /// Builds a forest from `shape`: node i hangs off the root if `shape[i]` is
    /// 0, and off node `shape[i] % i` otherwise
    fn random_forest(shape: &[u8]) -> (ReplyTreeCache, Vec<Option<usize>>) {
        let parents = shape
            .iter()
            .enumerate()
            .map(|(i, &s)| match (i, s) {
                (0, _) | (_, 0) => None,
                (i, s) => Some(s as usize % i),
            })
            .collect::<Vec<_>>();
        let names = (0..shape.len()).map(|i| format!("n{i}")).collect::<Vec<_>>();
        let mut buckets: BTreeMap<ParentKey, Vec<Reply>> = BTreeMap::new();
        buckets.insert(ParentKey::Root, Vec::new());
        for (i, p) in parents.iter().enumerate() {
            let parent = p.map(|p| names[p].as_str());
            let k = ParentKey::from(parent.map(ReplyId::from));
            buckets.entry(k).or_default().push(reply(&names[i], parent, 0));
        }
        let mut cache = ReplyTreeCache::new();
        for (k, v) in buckets {
            cache.put(k, v);
        }
        (cache, parents)
    }

    #[test]
    fn closure_matches_recursive_descendants() {
        bolero::check!()
            .with_type::<(Vec<u8>, u8)>()
            .cloned()
            .for_each(|(shape, target)| {
                if shape.is_empty() {
                    return;
                }
                let shape = &shape[..std::cmp::min(shape.len(), 64)];
                let (mut cache, parents) = random_forest(shape);
                let target = target as usize % shape.len();

                let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
                for (i, p) in parents.iter().enumerate() {
                    if let Some(p) = p {
                        children.entry(*p).or_default().push(i);
                    }
                }
                let mut expected = HashSet::new();
                let mut stack = vec![target];
                while let Some(n) = stack.pop() {
                    expected.insert(ReplyId(format!("n{n}")));
                    stack.extend(children.get(&n).into_iter().flatten().copied());
                }

                let before = cache.clone();
                let target = ReplyId(format!("n{target}"));
                let removed = CascadeDeleteResolver::purge(&mut cache, &target);
                assert_eq!(removed, expected);
                assert_eq!(cache.len() + expected.len(), before.len());
                for r in before.replies() {
                    assert_eq!(cache.contains(&r.id), !expected.contains(&r.id));
                }
                for (k, bucket) in before.buckets() {
                    let touched = k.reply_id().map_or(false, |id| expected.contains(id))
                        || bucket.iter().any(|r| expected.contains(&r.id));
                    if !touched {
                        assert_eq!(cache.get(k), Some(bucket));
                    }
                }
            });
    }
}
