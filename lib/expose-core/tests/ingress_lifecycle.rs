use expose_api::{PathMode, StrategyConfig};
use expose_core::{
    ExistingIndex, ExposeError, ExposeStrategy, FakeCluster, IngressStrategy, ServiceKey,
};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;

fn service(annotations: &[(&str, &str)]) -> Service {
    Service {
        metadata: ObjectMeta {
            namespace: Some("ns".to_string()),
            name: Some("svc".to_string()),
            uid: Some("svc-uid".to_string()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![
                ServicePort {
                    port: 1234,
                    ..Default::default()
                },
                ServicePort {
                    port: 5678,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn config() -> StrategyConfig {
    StrategyConfig {
        namespace: Some("ns".to_string()),
        domain: "my-domain.com".to_string(),
        url_template: "{{.Service}}.{{.Namespace}}.{{.Domain}}".to_string(),
        ..Default::default()
    }
}

/// Store a user edit of the service, keeping the URL the controller
/// published, and return what a watcher would deliver
fn observe(cluster: &FakeCluster, mut edited: Service) -> Service {
    let published = published_url(cluster);
    if let Some(url) = published {
        edited
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert("fabric8.io/exposeUrl".to_string(), url);
    }
    cluster.insert_service(edited);
    cluster.service("ns", "svc").unwrap()
}

fn backend_port(ingress: &Ingress) -> Option<i32> {
    ingress.spec.as_ref().unwrap().rules.as_ref().unwrap()[0]
        .http
        .as_ref()
        .unwrap()
        .paths[0]
        .backend
        .service
        .as_ref()
        .unwrap()
        .port
        .as_ref()
        .unwrap()
        .number
}

fn published_url(cluster: &FakeCluster) -> Option<String> {
    cluster
        .service("ns", "svc")?
        .metadata
        .annotations?
        .get("fabric8.io/exposeUrl")
        .cloned()
}

#[tokio::test]
async fn test_update_rename_and_clean() {
    let cluster = FakeCluster::new();
    let mut strategy = IngressStrategy::new(Arc::new(cluster.clone()), config()).unwrap();
    strategy.sync().await.unwrap();
    let key = ServiceKey::new("ns", "svc");

    // first Add creates the resource and publishes the URL
    let svc = observe(&cluster, service(&[("fabric8.io/expose", "true")]));
    strategy.add(&svc).await.unwrap();

    let ingresses = cluster.ingresses();
    assert_eq!(ingresses.len(), 1);
    let created = &ingresses[0];
    assert_eq!(created.metadata.name.as_deref(), Some("svc"));
    assert_eq!(backend_port(created), Some(1234));
    let owners = created.metadata.owner_references.as_ref().unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!((owners[0].kind.as_str(), owners[0].name.as_str()), ("Service", "svc"));
    assert_eq!(published_url(&cluster).as_deref(), Some("http://svc.ns.my-domain.com"));
    assert_eq!(cluster.operation_counts().creates, 1);
    assert_eq!(cluster.operation_counts().service_patches, 1);

    // unchanged service, nothing to write
    let svc = cluster.service("ns", "svc").unwrap();
    cluster.reset_counts();
    strategy.add(&svc).await.unwrap();
    assert_eq!(cluster.operation_counts().writes(), 0);

    // port override patches the backend in place
    let svc = observe(
        &cluster,
        service(&[("fabric8.io/expose", "true"), ("fabric8.io/exposePort", "5678")]),
    );
    cluster.reset_counts();
    strategy.add(&svc).await.unwrap();
    assert_eq!(cluster.operation_counts().patches, 1);
    assert_eq!(cluster.operation_counts().creates, 0);
    assert_eq!(cluster.operation_counts().service_patches, 0);
    assert_eq!(backend_port(&cluster.ingress("ns", "svc").unwrap()), Some(5678));

    // rename replaces the resource
    let svc = observe(
        &cluster,
        service(&[
            ("fabric8.io/expose", "true"),
            ("fabric8.io/exposePort", "5678"),
            ("fabric8.io/ingress.name", "ingress"),
        ]),
    );
    cluster.reset_counts();
    strategy.add(&svc).await.unwrap();
    let names: Vec<_> = cluster
        .ingresses()
        .into_iter()
        .filter_map(|i| i.metadata.name)
        .collect();
    assert_eq!(names, ["ingress"]);
    assert_eq!(strategy.existing().names(&key), ["ingress"]);
    assert_eq!(cluster.operation_counts().deletes, 1);
    assert_eq!(cluster.operation_counts().creates, 1);
    assert_eq!(published_url(&cluster).as_deref(), Some("http://ingress.ns.my-domain.com"));

    // custom annotations are merged
    let svc = observe(
        &cluster,
        service(&[
            ("fabric8.io/expose", "true"),
            ("fabric8.io/exposePort", "5678"),
            ("fabric8.io/ingress.name", "ingress"),
            ("fabric8.io/ingress.annotations", "custom: \"true\"\n"),
        ]),
    );
    strategy.add(&svc).await.unwrap();
    let annotated = cluster.ingress("ns", "ingress").unwrap();
    assert_eq!(
        annotated.metadata.annotations.unwrap(),
        BTreeMap::from([
            ("custom".to_string(), "true".to_string()),
            ("fabric8.io/generated-by".to_string(), "exposecontroller".to_string()),
        ])
    );

    // dropping the marker cleans everything up
    let svc = observe(
        &cluster,
        service(&[
            ("fabric8.io/exposePort", "5678"),
            ("fabric8.io/ingress.name", "ingress"),
        ]),
    );
    strategy.clean(&svc).await.unwrap();
    assert!(cluster.ingresses().is_empty());
    assert!(strategy.existing().is_empty());
    assert_eq!(published_url(&cluster), None);
}

#[tokio::test]
async fn test_sync_then_add_adopts_existing_resource() {
    let cluster = FakeCluster::new();
    let mut strategy = IngressStrategy::new(Arc::new(cluster.clone()), config()).unwrap();
    let svc = observe(&cluster, service(&[("fabric8.io/expose", "true")]));
    strategy.add(&svc).await.unwrap();

    // a restarted controller rebuilds the same index and writes nothing
    let mut restarted = IngressStrategy::new(Arc::new(cluster.clone()), config()).unwrap();
    restarted.sync().await.unwrap();
    assert_eq!(
        restarted.existing(),
        &ExistingIndex::from([(ServiceKey::new("ns", "svc"), vec!["svc"])])
    );

    let svc = cluster.service("ns", "svc").unwrap();
    cluster.reset_counts();
    restarted.add(&svc).await.unwrap();
    assert_eq!(cluster.operation_counts().writes(), 0);
}

#[tokio::test]
async fn test_tls_acme_with_prefix() {
    let cluster = FakeCluster::new();
    let config = StrategyConfig {
        name_prefix: "prefix".to_string(),
        url_template: "{{.Service}}-{{.Namespace}}.{{.Domain}}".to_string(),
        tls_acme: true,
        ..config()
    };
    let mut strategy = IngressStrategy::new(Arc::new(cluster.clone()), config).unwrap();
    let svc = observe(&cluster, service(&[("fabric8.io/expose", "true")]));

    strategy.add(&svc).await.unwrap();

    let ingress = cluster.ingress("ns", "prefix-svc").unwrap();
    let tls = &ingress.spec.unwrap().tls.unwrap()[0];
    assert_eq!(tls.hosts.as_deref(), Some(&["svc-ns.my-domain.com".to_string()][..]));
    assert_eq!(tls.secret_name.as_deref(), Some("tls-svc"));
    assert_eq!(
        ingress.metadata.annotations.unwrap()["kubernetes.io/tls-acme"],
        "true"
    );
    assert_eq!(published_url(&cluster).as_deref(), Some("https://svc-ns.my-domain.com"));
}

#[tokio::test]
async fn test_path_mode_publishes_path_url() {
    let cluster = FakeCluster::new();
    let config = StrategyConfig {
        domain: "example.com".to_string(),
        path_mode: PathMode::Path,
        ..config()
    };
    let mut strategy = IngressStrategy::new(Arc::new(cluster.clone()), config).unwrap();
    let svc = observe(&cluster, service(&[("fabric8.io/expose", "true")]));

    strategy.add(&svc).await.unwrap();

    let ingress = cluster.ingress("ns", "svc").unwrap();
    let rule = &ingress.spec.unwrap().rules.unwrap()[0];
    assert_eq!(rule.host.as_deref(), Some("example.com"));
    assert_eq!(
        rule.http.as_ref().unwrap().paths[0].path.as_deref(),
        Some("/ns/svc/")
    );
    assert_eq!(published_url(&cluster).as_deref(), Some("http://example.com/ns/svc/"));
}

#[tokio::test]
async fn test_host_name_as_receives_bare_host() {
    let cluster = FakeCluster::new();
    let mut strategy = IngressStrategy::new(Arc::new(cluster.clone()), config()).unwrap();
    let svc = observe(
        &cluster,
        service(&[
            ("fabric8.io/expose", "true"),
            ("fabric8.io/exposeHostNameAs", "public-host"),
        ]),
    );

    strategy.add(&svc).await.unwrap();

    let annotations = cluster.service("ns", "svc").unwrap().metadata.annotations.unwrap();
    assert_eq!(annotations["public-host"], "svc.ns.my-domain.com");

    let svc = cluster.service("ns", "svc").unwrap();
    strategy.clean(&svc).await.unwrap();
    let annotations = cluster.service("ns", "svc").unwrap().metadata.annotations.unwrap();
    assert!(!annotations.contains_key("public-host"));
    assert!(!annotations.contains_key("fabric8.io/exposeUrl"));
}

#[tokio::test]
async fn test_malformed_block_is_reported_per_service() {
    let cluster = FakeCluster::new();
    let mut strategy = IngressStrategy::new(Arc::new(cluster.clone()), config()).unwrap();
    let svc = observe(
        &cluster,
        service(&[
            ("fabric8.io/expose", "true"),
            ("fabric8.io/ingress.annotations", "nested:\n  key: value\n"),
        ]),
    );
    cluster.reset_counts();

    let err = strategy.add(&svc).await.unwrap_err();
    assert!(matches!(err, ExposeError::MalformedAnnotations { .. }));
    assert_eq!(cluster.operation_counts().writes(), 0);
}
