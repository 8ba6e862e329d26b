//! Property-based tests for priority resolution and scope behaviour

use burrow_di::*;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A bean that remembers its registration index
#[derive(Debug)]
struct Handler {
    index: usize,
}

trait Named: Send + Sync {
    fn index(&self) -> usize;
}

impl Named for Handler {
    fn index(&self) -> usize {
        self.index
    }
}

fn handler(index: usize, priority: i32) -> BeanDefinition {
    BeanDefinition::builder(move |_| Ok(Arc::new(Handler { index })))
        .priority(priority)
        .expose::<dyn Named>(|h| h as Arc<dyn Named>)
        .build()
}

fn started(priorities: &[i32]) -> Container {
    let container = Container::new();
    for (index, priority) in priorities.iter().enumerate() {
        container.register(handler(index, *priority)).unwrap();
    }
    container.start().unwrap();
    container
}

/// Expected order: descending priority, registration order within a priority
fn expected_order(priorities: &[i32]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..priorities.len()).collect();
    indices.sort_by(|a, b| priorities[*b].cmp(&priorities[*a]).then(a.cmp(b)));
    indices
}

proptest! {
    #[test]
    fn test_single_lookup_returns_highest_priority(priorities in prop::collection::vec(-5i32..5, 1..12)) {
        let container = started(&priorities);
        let expected = expected_order(&priorities)[0];

        let found = container.lookup::<dyn Named>().unwrap();
        prop_assert_eq!(found.index(), expected);

        // Deterministic across repeated lookups
        let again = container.lookup::<dyn Named>().unwrap();
        prop_assert_eq!(again.index(), expected);
    }
}

proptest! {
    #[test]
    fn test_lookups_follow_priority_then_registration(priorities in prop::collection::vec(-5i32..5, 0..12)) {
        let container = started(&priorities);

        let found: Vec<usize> = container
            .lookups::<dyn Named>()
            .unwrap()
            .iter()
            .map(|h| h.index())
            .collect();
        prop_assert_eq!(found, expected_order(&priorities));
    }
}

proptest! {
    #[test]
    fn test_lookups_order_survives_permutation(
        priorities in prop::collection::vec(0i32..4, 1..10).prop_shuffle(),
    ) {
        // Beans are identified by (priority, position among equal priorities),
        // which any permutation of the registration sequence must preserve
        let container = started(&priorities);
        let found: Vec<i32> = container
            .lookups::<dyn Named>()
            .unwrap()
            .iter()
            .map(|h| priorities[h.index()])
            .collect();

        let mut sorted = priorities.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        prop_assert_eq!(found, sorted);
    }
}

proptest! {
    #[test]
    fn test_scope_controls_factory_calls(lookups in 1usize..20, shared in any::<bool>()) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let scope = if shared { ScopeKind::ApplicationScoped } else { ScopeKind::DefaultScoped };

        let container = Container::new();
        container
            .register(BeanDefinition::supplier(scope, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(0u64))
            }))
            .unwrap();
        container.start().unwrap();

        let held: Vec<_> = (0..lookups).map(|_| container.lookup::<u64>().unwrap()).collect();
        let expected = if shared { 1 } else { lookups };
        prop_assert_eq!(calls.load(Ordering::SeqCst), expected);
        prop_assert!(held.windows(2).all(|w| w[0].same_instance(&w[1]) == shared));
    }
}

proptest! {
    #[test]
    fn test_chain_teardown_is_reverse_creation(depth in 1usize..8) {
        // Bean i depends on bean i - 1, expressed through qualifiers on one type
        let destroyed = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let container = Container::new();

        for i in 0..depth {
            let log = destroyed.clone();
            let mut builder = BeanDefinition::builder(move |ctx| {
                if i > 0 {
                    ctx.get_qualified::<usize>(&(i - 1).to_string())?;
                }
                Ok(Arc::new(i))
            })
            .application_scoped()
            .qualifier(i.to_string())
            .on_destroy(move |value| {
                log.lock().push(*value);
                Ok(())
            });
            if i > 0 {
                builder = builder.depends_on_qualified::<usize>((i - 1).to_string());
            }
            container.register(builder).unwrap();
        }
        container.start().unwrap();

        let top = container.lookup_qualified::<usize>(&(depth - 1).to_string()).unwrap();
        prop_assert_eq!(*top, depth - 1);
        drop(top);

        container.close().unwrap();
        let expected: Vec<usize> = (0..depth).rev().collect();
        prop_assert_eq!(destroyed.lock().clone(), expected);
    }
}
