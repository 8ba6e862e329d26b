//! Container state machine and teardown ordering

use burrow_di::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Log = Arc<Mutex<Vec<&'static str>>>;

struct X;
struct Y;
struct Z;

fn logged<T, F>(name: &'static str, scope: ScopeKind, log: &Log, make: F) -> BeanDefinitionBuilder<T>
where
    T: Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    let created = log.clone();
    let destroyed = log.clone();
    BeanDefinition::builder(move |_| {
        created.lock().push(name);
        Ok(Arc::new(make()))
    })
    .scope(scope)
    .on_destroy(move |_| {
        destroyed.lock().push(name);
        Ok(())
    })
}

#[test]
fn test_close_destroys_dependents_first() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    container
        .register(logged("X", ScopeKind::ApplicationScoped, &log, || X))
        .unwrap();
    container
        .register(logged("Y", ScopeKind::ApplicationScoped, &log, || Y).depends_on::<X>())
        .unwrap();
    container.start().unwrap();

    container.lookup::<Y>().unwrap();
    assert_eq!(*log.lock(), vec!["X", "Y"]);

    log.lock().clear();
    container.close().unwrap();
    assert_eq!(*log.lock(), vec!["Y", "X"]);
}

#[test]
fn test_close_runs_each_destroy_hook_once() {
    let destroyed = Arc::new(AtomicUsize::new(0));
    let counter = destroyed.clone();

    let container = Container::new();
    container
        .register(
            BeanDefinition::supplier(ScopeKind::ApplicationScoped, || Ok(Arc::new(X))).on_destroy(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    container.start().unwrap();

    container.lookup::<X>().unwrap();
    container.lookup::<X>().unwrap();
    container.close().unwrap();
    container.close().unwrap();
    drop(container);

    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_destroy_failures_are_aggregated() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();

    let first = log.clone();
    container
        .register(
            BeanDefinition::supplier(ScopeKind::ApplicationScoped, || Ok(Arc::new(X)))
                .on_destroy(move |_| {
                    first.lock().push("X");
                    anyhow::bail!("X refused to stop")
                }),
        )
        .unwrap();
    container
        .register(logged("Y", ScopeKind::ApplicationScoped, &log, || Y))
        .unwrap();
    let third = log.clone();
    container
        .register(
            BeanDefinition::supplier(ScopeKind::ApplicationScoped, || Ok(Arc::new(Z)))
                .on_destroy(move |_| {
                    third.lock().push("Z");
                    anyhow::bail!("Z refused to stop")
                }),
        )
        .unwrap();
    container.start().unwrap();

    container.lookup::<X>().unwrap();
    container.lookup::<Y>().unwrap();
    container.lookup::<Z>().unwrap();
    log.lock().clear();

    let err = container.close().unwrap_err();
    assert_eq!(*log.lock(), vec!["Z", "Y", "X"]);
    match err {
        DIError::ShutdownFailed { failures } => {
            assert_eq!(failures.len(), 2);
            assert!(failures.iter().all(|f| matches!(f, DIError::DestroyFailed { .. })));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(container.state(), ContainerState::Closed);
}

#[test]
fn test_default_scoped_release_destroys_owned_dependencies() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    container
        .register(logged("X", ScopeKind::DefaultScoped, &log, || X))
        .unwrap();
    container
        .register(logged("Y", ScopeKind::DefaultScoped, &log, || Y).depends_on::<X>())
        .unwrap();
    container.start().unwrap();

    let y = container.lookup::<Y>().unwrap();
    log.lock().clear();
    y.release().unwrap();
    assert_eq!(*log.lock(), vec!["Y", "X"]);

    log.lock().clear();
    container.close().unwrap();
    assert!(log.lock().is_empty());
}

#[test]
fn test_dropping_default_scoped_instance_releases_it() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    container
        .register(logged("X", ScopeKind::DefaultScoped, &log, || X))
        .unwrap();
    container.start().unwrap();

    {
        let _x = container.lookup::<X>().unwrap();
    }
    assert_eq!(*log.lock(), vec!["X", "X"]);
}

#[test]
fn test_close_sweeps_unreleased_default_scoped_instances() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    container
        .register(logged("X", ScopeKind::DefaultScoped, &log, || X))
        .unwrap();
    container.start().unwrap();

    let held = container.lookup::<X>().unwrap();
    log.lock().clear();
    container.close().unwrap();
    assert_eq!(*log.lock(), vec!["X"]);

    // Already destroyed by close
    held.release().unwrap();
    assert_eq!(log.lock().len(), 1);
}

#[test]
fn test_releasing_application_scoped_instance_is_noop() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    container
        .register(logged("X", ScopeKind::ApplicationScoped, &log, || X))
        .unwrap();
    container.start().unwrap();

    container.lookup::<X>().unwrap().release().unwrap();
    assert_eq!(*log.lock(), vec!["X"]);

    container.close().unwrap();
    assert_eq!(*log.lock(), vec!["X", "X"]);
}

#[test]
fn test_releasing_shared_dependency_destroys_dependents_first() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    container
        .register(logged("X", ScopeKind::DefaultScoped, &log, || X))
        .unwrap();
    container
        .register(logged("Y", ScopeKind::ApplicationScoped, &log, || Y).depends_on::<X>())
        .unwrap();
    container
        .register(logged("Z", ScopeKind::ApplicationScoped, &log, || Z).depends_on::<Y>())
        .unwrap();
    container.start().unwrap();

    container.lookup::<Z>().unwrap();
    log.lock().clear();
    container.close().unwrap();
    assert_eq!(*log.lock(), vec!["Z", "Y", "X"]);
}

#[test]
fn test_register_after_start_fails() {
    let container = Container::new();
    container.start().unwrap();

    let err = container
        .register(BeanDefinition::provided(Arc::new(X)))
        .unwrap_err();
    assert!(matches!(
        err,
        DIError::InvalidState {
            state: ContainerState::Started,
            ..
        }
    ));

    let err = container
        .register_scope("request", Arc::new(DefaultScope))
        .unwrap_err();
    assert!(matches!(err, DIError::InvalidState { .. }));
}

#[test]
fn test_lookup_before_start_fails() {
    let container = Container::new();
    container.register(BeanDefinition::provided(Arc::new(X))).unwrap();

    let err = container.lookup::<X>().unwrap_err();
    assert!(matches!(
        err,
        DIError::InvalidState {
            state: ContainerState::Unstarted,
            ..
        }
    ));
    assert!(container.lookups::<X>().is_err());
}

#[test]
fn test_lookup_after_close_fails() {
    let container = Container::new();
    container.register(BeanDefinition::provided(Arc::new(X))).unwrap();
    container.start().unwrap();
    container.close().unwrap();

    let err = container.lookup::<X>().unwrap_err();
    assert!(matches!(
        err,
        DIError::InvalidState {
            state: ContainerState::Closed,
            ..
        }
    ));
}

#[test]
fn test_not_found_has_no_side_effects() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    container
        .register(logged("X", ScopeKind::ApplicationScoped, &log, || X))
        .unwrap();
    container.start().unwrap();

    let err = container.lookup::<Z>().unwrap_err();
    assert!(err.is_not_found());
    assert!(log.lock().is_empty());
    assert_eq!(container.bean_count(), 1);

    container.lookup::<X>().unwrap();
    assert_eq!(*log.lock(), vec!["X"]);
}

#[test]
fn test_custom_scope_receives_release() {
    struct Counting {
        released: Arc<AtomicUsize>,
    }

    impl Scope for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn get_or_create(
            &self,
            _definition: &BeanDefinition,
            create: &mut Creator<'_>,
        ) -> DIResult<Arc<BeanInstance>> {
            create()
        }

        fn release(&self) -> Vec<DIError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }
    }

    let released = Arc::new(AtomicUsize::new(0));
    let container = Container::builder()
        .scope(
            "counting",
            Counting {
                released: released.clone(),
            },
        )
        .unwrap()
        .register(BeanDefinition::supplier(ScopeKind::Custom("counting"), || Ok(Arc::new(X))))
        .unwrap()
        .start()
        .unwrap();

    let a = container.lookup::<X>().unwrap();
    assert_eq!(a.scope(), Some(ScopeKind::Custom("counting")));
    container.close().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
}
