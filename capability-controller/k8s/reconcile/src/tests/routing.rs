use super::*;
use crate::{Backoff, Error};
use capability_controller_core::{OWNER_KIND, OWNER_MODE, OWNER_NAME, OWNER_UID};
use maplit::btreemap;
use pretty_assertions::assert_eq;
use std::time::Duration;

fn routes(store: &MemoryStore) -> Vec<String> {
    store.names(&resources::route())
}

fn virtual_services(store: &MemoryStore) -> Vec<String> {
    store.names(&resources::virtual_service())
}

/// The public kinds other than the VirtualService, which is shared with the
/// external mode.
fn public_kinds(store: &MemoryStore) -> Vec<Vec<String>> {
    vec![
        store.names_in(&resources::service(), GATEWAY_NS),
        store.names(&resources::gateway()),
        store.names(&resources::destination_rule()),
    ]
}

fn public_names(name: &str) -> Vec<Vec<String>> {
    vec![vec![name.to_string()]; 3]
}

#[tokio::test(start_paused = true)]
async fn external_mode_exposes_each_service_port() {
    let store = store_with(&[(&external_mode(), "true")]);
    let reconciler = reconciler(routing(), &store);

    reconciler.reconcile(&target(&store)).await.unwrap();

    assert_eq!(routes(&store), vec!["svc1-http-ns1-route"]);
    assert_eq!(virtual_services(&store), vec!["svc1-http-ns1-ingress"]);
    let route = store
        .try_get(&resources::route(), Some(GATEWAY_NS), "svc1-http-ns1-route")
        .unwrap();
    assert_eq!(
        route.metadata.labels.unwrap(),
        btreemap! {
            OWNER_NAME.to_string() => NAME.to_string(),
            OWNER_KIND.to_string() => "Component".to_string(),
            OWNER_UID.to_string() => target(&store).owner().uid().to_string(),
            OWNER_MODE.to_string() => "external".to_string(),
        }
    );
    assert_eq!(route.data["spec"]["host"], "svc1-http-ns1.apps.example.com");

    assert_eq!(finalizers(&store), vec![route::FINALIZER]);
    assert_eq!(
        annotation(&store, route::EXTERNAL_ADDRESSES).as_deref(),
        Some("svc1-http-ns1.apps.example.com")
    );
    assert_eq!(annotation(&store, route::PUBLIC_ADDRESSES), None);
}

#[tokio::test(start_paused = true)]
async fn unchanged_targets_are_not_written() {
    let store = store_with(&[(&external_mode(), "true"), (&public_mode(), "true")]);
    let reconciler = reconciler(routing(), &store);

    reconciler.reconcile(&target(&store)).await.unwrap();
    assert!(!store.take_writes().is_empty());

    reconciler.reconcile(&target(&store)).await.unwrap();
    assert_eq!(store.take_writes(), Vec::<String>::new());
}

#[tokio::test(start_paused = true)]
async fn server_defaults_do_not_cause_updates() {
    let store = store_with(&[(&external_mode(), "true")]);
    let reconciler = reconciler(routing(), &store);
    reconciler.reconcile(&target(&store)).await.unwrap();

    // The API server fills in defaults the template does not set.
    let mut route = store
        .try_get(&resources::route(), Some(GATEWAY_NS), "svc1-http-ns1-route")
        .unwrap();
    route.data["spec"]["to"]["namespace"] = json!(GATEWAY_NS);
    route.data["spec"]["subdomain"] = json!("");
    route.data["status"] = json!({ "ingress": [] });
    store.seed(&resources::route(), route);
    store.take_writes();

    reconciler.reconcile(&target(&store)).await.unwrap();
    assert_eq!(store.take_writes(), Vec::<String>::new());
}

#[tokio::test(start_paused = true)]
async fn drifted_resources_are_restored() {
    let store = store_with(&[(&external_mode(), "true")]);
    let reconciler = reconciler(routing(), &store);
    reconciler.reconcile(&target(&store)).await.unwrap();

    let mut route = store
        .try_get(&resources::route(), Some(GATEWAY_NS), "svc1-http-ns1-route")
        .unwrap();
    route.data["spec"]["host"] = json!("hijacked.example.com");
    route.data["spec"]["extra"] = json!("kept");
    store.seed(&resources::route(), route);
    store.take_writes();

    reconciler.reconcile(&target(&store)).await.unwrap();
    assert_eq!(
        store.take_writes(),
        vec!["update Route istio-system/svc1-http-ns1-route"]
    );
    let route = store
        .try_get(&resources::route(), Some(GATEWAY_NS), "svc1-http-ns1-route")
        .unwrap();
    assert_eq!(route.data["spec"]["host"], "svc1-http-ns1.apps.example.com");
    assert_eq!(route.data["spec"]["extra"], "kept");
}

#[tokio::test(start_paused = true)]
async fn modes_are_added_and_removed_independently() {
    let store = store_with(&[(&external_mode(), "true")]);
    let reconciler = reconciler(routing(), &store);
    reconciler.reconcile(&target(&store)).await.unwrap();

    annotate(&store, &public_mode(), Some("true"));
    reconciler.reconcile(&target(&store)).await.unwrap();
    assert_eq!(routes(&store), vec!["svc1-http-ns1-route"]);
    assert_eq!(
        virtual_services(&store),
        vec!["svc1-http-ns1", "svc1-http-ns1-ingress"]
    );
    assert_eq!(
        public_kinds(&store),
        public_names("svc1-http-ns1")
    );
    assert_eq!(
        annotation(&store, route::PUBLIC_ADDRESSES).as_deref(),
        Some("svc1-http-ns1.istio-system.svc.cluster.local")
    );

    annotate(&store, &external_mode(), None);
    reconciler.reconcile(&target(&store)).await.unwrap();
    assert_eq!(routes(&store), Vec::<String>::new());
    assert_eq!(virtual_services(&store), vec!["svc1-http-ns1"]);
    assert_eq!(
        public_kinds(&store),
        public_names("svc1-http-ns1")
    );
    assert_eq!(annotation(&store, route::EXTERNAL_ADDRESSES), None);
    assert!(annotation(&store, route::PUBLIC_ADDRESSES).is_some());

    // The finalizer stays for as long as the target lives.
    annotate(&store, &public_mode(), None);
    reconciler.reconcile(&target(&store)).await.unwrap();
    assert_eq!(virtual_services(&store), Vec::<String>::new());
    assert_eq!(public_kinds(&store), vec![Vec::<String>::new(); 3]);
    assert_eq!(finalizers(&store), vec![route::FINALIZER]);
}

#[tokio::test(start_paused = true)]
async fn disabled_modes_are_not_requested() {
    let store = store_with(&[(&external_mode(), "false")]);
    let reconciler = reconciler(routing(), &store);
    reconciler.reconcile(&target(&store)).await.unwrap();
    assert_eq!(routes(&store), Vec::<String>::new());
    assert_eq!(annotation(&store, route::EXTERNAL_ADDRESSES), None);
}

#[tokio::test(start_paused = true)]
async fn invalid_modes_are_ignored() {
    let bogus = format!("{}bogus", route::MODE_PREFIX);
    let store = store_with(&[(&bogus, "true"), (&external_mode(), "true")]);
    let reconciler = reconciler(routing(), &store);

    reconciler.reconcile(&target(&store)).await.unwrap();
    assert_eq!(routes(&store), vec!["svc1-http-ns1-route"]);
}

#[tokio::test(start_paused = true)]
async fn resources_of_unknown_modes_are_deleted() {
    let store = store_with(&[(&external_mode(), "true")]);
    let reconciler = reconciler(routing(), &store);
    let owner = target(&store).owner().clone();

    // Left behind by a release that knew a `legacy` mode.
    let mut stale = DynamicObject::new("svc1-legacy", &resources::route()).within(GATEWAY_NS);
    owner.stamp(&"legacy".into(), &mut stale);
    store.seed(&resources::route(), stale);

    reconciler.reconcile(&target(&store)).await.unwrap();
    assert_eq!(routes(&store), vec!["svc1-http-ns1-route"]);
}

#[tokio::test(start_paused = true)]
async fn resources_of_other_owners_are_kept() {
    let store = store_with(&[]);
    let reconciler = reconciler(routing(), &store);

    let other = capability_controller_core::Owner::new(NAME, "Component", "another-uid");
    let mut theirs =
        DynamicObject::new("svc1-http-ns1-route", &resources::route()).within(GATEWAY_NS);
    other.stamp(&route::EXTERNAL.into(), &mut theirs);
    store.seed(&resources::route(), theirs);

    reconciler.reconcile(&target(&store)).await.unwrap();
    assert_eq!(routes(&store), vec!["svc1-http-ns1-route"]);
}

#[tokio::test(start_paused = true)]
async fn resources_held_by_another_target_are_not_taken_over() {
    let store = store_with(&[(&external_mode(), "true")]);
    store.seed(
        &component_resource(),
        component_named("comp2", &[(&external_mode(), "true")]),
    );
    // Both components select svc1 and so render the same derived names.
    let exported = || {
        SelectorTemplates::new(btreemap! {
            "routing.opendatahub.io/exported".to_string() => "true".to_string(),
        })
    };
    let comp1 = reconciler(routing_selecting(exported()), &store);
    let comp2 = reconciler(routing_selecting(exported()), &store);

    comp1.reconcile(&target(&store)).await.unwrap();
    store.take_writes();

    let error = comp2
        .reconcile(&target_named(&store, "comp2"))
        .await
        .unwrap_err();
    let Error::Aggregate(errors) = &error else {
        panic!("expected both derived resources to be refused, got {error}");
    };
    assert_eq!(errors.len(), 2, "{error}");
    assert!(
        errors.iter().all(|e| matches!(
            e,
            Error::OwnedElsewhere { owner, .. } if owner == "Component comp1"
        )),
        "{error}"
    );
    assert!(
        store
            .take_writes()
            .iter()
            .all(|write| !write.contains("svc1-http-ns1")),
        "derived resources of comp1 were written"
    );
    for (kind, name) in [
        (resources::route(), "svc1-http-ns1-route"),
        (resources::virtual_service(), "svc1-http-ns1-ingress"),
    ] {
        let object = store.try_get(&kind, Some(GATEWAY_NS), name).unwrap();
        assert_eq!(object.metadata.labels.unwrap()[OWNER_NAME], NAME);
    }

    // The owner keeps converging without writes.
    comp1.reconcile(&target(&store)).await.unwrap();
    assert_eq!(store.take_writes(), Vec::<String>::new());

    // Deleting the other component leaves the resources in place.
    store.request_deletion(&component_resource(), Some(NS), "comp2");
    comp2
        .reconcile(&target_named(&store, "comp2"))
        .await
        .unwrap();
    assert_eq!(routes(&store), vec!["svc1-http-ns1-route"]);
    assert_eq!(virtual_services(&store), vec!["svc1-http-ns1-ingress"]);
}

#[tokio::test(start_paused = true)]
async fn recreated_targets_adopt_their_resources() {
    let store = store_with(&[(&external_mode(), "true")]);
    let previous = capability_controller_core::Owner::new(NAME, "Component", "previous-uid");
    let mut stale =
        DynamicObject::new("svc1-http-ns1-route", &resources::route()).within(GATEWAY_NS);
    previous.stamp(&route::EXTERNAL.into(), &mut stale);
    stale.data = json!({ "spec": { "host": "stale.example.com" } });
    store.seed(&resources::route(), stale);

    reconciler(routing(), &store)
        .reconcile(&target(&store))
        .await
        .unwrap();
    let route = store
        .try_get(&resources::route(), Some(GATEWAY_NS), "svc1-http-ns1-route")
        .unwrap();
    assert_eq!(
        route.metadata.labels.unwrap()[OWNER_UID],
        target(&store).owner().uid()
    );
    assert_eq!(route.data["spec"]["host"], "svc1-http-ns1.apps.example.com");
}

#[tokio::test(start_paused = true)]
async fn removed_ports_are_pruned() {
    let store = store_with(&[(&external_mode(), "true")]);
    store.seed(
        &resources::service(),
        service(
            "svc1",
            json!([{ "name": "http", "port": 8080 }, { "name": "grpc", "port": 9090 }]),
        ),
    );
    let reconciler = reconciler(routing(), &store);

    reconciler.reconcile(&target(&store)).await.unwrap();
    assert_eq!(
        routes(&store),
        vec!["svc1-grpc-ns1-route", "svc1-http-ns1-route"]
    );
    assert_eq!(
        annotation(&store, route::EXTERNAL_ADDRESSES).as_deref(),
        Some("svc1-http-ns1.apps.example.com;svc1-grpc-ns1.apps.example.com")
    );

    store.seed(
        &resources::service(),
        service("svc1", json!([{ "name": "http", "port": 8080 }])),
    );
    reconciler.reconcile(&target(&store)).await.unwrap();
    assert_eq!(routes(&store), vec!["svc1-http-ns1-route"]);
    assert_eq!(virtual_services(&store), vec!["svc1-http-ns1-ingress"]);
    assert_eq!(
        annotation(&store, route::EXTERNAL_ADDRESSES).as_deref(),
        Some("svc1-http-ns1.apps.example.com")
    );
}

#[tokio::test(start_paused = true)]
async fn waits_for_collaborators() {
    let store = Arc::new(MemoryStore::default());
    store.seed(&component_resource(), component(&[(&external_mode(), "true")]));
    let reconciler = reconciler(routing(), &store);

    let target = target(&store);
    let (result, ()) = tokio::join!(reconciler.reconcile(&target), async {
        tokio::time::sleep(Duration::from_millis(700)).await;
        store.seed(
            &resources::service(),
            service("svc1", json!([{ "name": "http", "port": 8080 }])),
        );
    });
    result.unwrap();
    assert_eq!(routes(&store), vec!["svc1-http-ns1-route"]);
}

#[tokio::test(start_paused = true)]
async fn missing_collaborators_fail_after_bounded_attempts() {
    let store = Arc::new(MemoryStore::default());
    store.seed(&component_resource(), component(&[(&external_mode(), "true")]));
    let reconciler = reconciler_with(
        routing(),
        &store,
        Config {
            lookup: Backoff::lookup(3),
            ..Config::default()
        },
    );

    let error = reconciler.reconcile(&target(&store)).await.unwrap_err();
    assert!(
        matches!(
            error,
            Error::CollaboratorNotYetAvailable { attempts: 3, .. }
        ),
        "{error}"
    );
    // The finalizer is still in place so that a later pass can clean up.
    assert_eq!(finalizers(&store), vec![route::FINALIZER]);
}

#[tokio::test(start_paused = true)]
async fn slow_passes_time_out() {
    let store = Arc::new(MemoryStore::default());
    store.seed(&component_resource(), component(&[(&external_mode(), "true")]));
    let reconciler = reconciler_with(
        routing(),
        &store,
        Config {
            timeout: Duration::from_secs(1),
            ..Config::default()
        },
    );

    let error = reconciler.reconcile(&target(&store)).await.unwrap_err();
    assert!(matches!(error, Error::Timeout(_)), "{error}");
}

#[tokio::test(start_paused = true)]
async fn unlistable_kinds_fall_back_to_every_unused_mode() {
    let store = store_with(&[(&external_mode(), "true"), (&public_mode(), "true")]);
    let reconciler = reconciler(routing(), &store);
    reconciler.reconcile(&target(&store)).await.unwrap();

    annotate(&store, &external_mode(), None);
    store.fail_lists(&resources::gateway());
    store.take_writes();
    reconciler.reconcile(&target(&store)).await.unwrap();

    assert_eq!(routes(&store), Vec::<String>::new());
    assert_eq!(virtual_services(&store), vec!["svc1-http-ns1"]);
    let deletes = store
        .take_writes()
        .into_iter()
        .filter(|w| w.starts_with("delete_all_of"))
        .count();
    assert_eq!(deletes, 2, "Route and VirtualService of the external mode");
}
