//! Random sampling without replacement.

use std::collections::HashSet;

use rand::Rng;

/// Picks `count` distinct items from `items` uniformly at random.
///
/// Asking for more items than exist returns a copy of the whole slice.
/// Draws come from the thread-local CSPRNG, with rejection of already
/// chosen indices so no item repeats within one call.
pub fn pick_random<T: Clone>(items: &[T], count: usize) -> Vec<T> {
    if count >= items.len() {
        return items.to_vec();
    }

    let mut rng = rand::rng();
    let mut chosen = HashSet::with_capacity(count);
    let mut picked = Vec::with_capacity(count);
    while picked.len() < count {
        let index = rng.random_range(0..items.len());
        if chosen.insert(index) {
            picked.push(items[index].clone());
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_requested_number_of_distinct_items() {
        let items: Vec<u32> = (0..100).collect();
        let picked = pick_random(&items, 10);

        assert_eq!(picked.len(), 10);
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 10);
        assert!(picked.iter().all(|item| items.contains(item)));
    }

    #[test]
    fn oversized_requests_return_everything() {
        let items = vec!["a", "b", "c"];
        let picked = pick_random(&items, 10);
        assert_eq!(picked, items);
    }

    #[test]
    fn exact_request_returns_everything() {
        let items = vec![1, 2, 3, 4];
        assert_eq!(pick_random(&items, 4).len(), 4);
    }

    #[test]
    fn zero_count_and_empty_input_yield_nothing() {
        let items = vec![1, 2, 3];
        assert!(pick_random(&items, 0).is_empty());

        let empty: Vec<u32> = Vec::new();
        assert!(pick_random(&empty, 5).is_empty());
    }
}
