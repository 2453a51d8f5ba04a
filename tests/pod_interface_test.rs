mod support;

use std::sync::Arc;
use tracing::Span;

use infra_cni::agent::{RequestContext, RpcError};
use infra_cni::link::{IpvlanMode, LinkError};
use infra_cni::netconf::ipvlan::create_network_request;
use infra_cni::netconf::{new_pod_interface, InterfaceConfig, InterfaceType, IpvlanPodInterface, PodInterface};
use infra_cni::proto::{CreateNetworkRequest, DeleteNetworkRequest, IpConfiguration};
use infra_cni::Error;

use support::{sample_add_request, AgentBehavior, FakeAgent, FakeProvisioner, LinkCall, FAKE_MAC, MASTER};

fn ipvlan(provisioner: &Arc<FakeProvisioner>) -> IpvlanPodInterface {
    IpvlanPodInterface::new(MASTER, provisioner.clone(), Span::none())
}

#[test]
fn test_create_reports_master_and_mac() {
    let provisioner = Arc::new(FakeProvisioner::default());
    let pod = ipvlan(&provisioner);
    assert_eq!(pod.pod_mac(), None);

    let info = pod.create_pod_interface(&sample_add_request()).unwrap();

    assert_eq!(info.interface_name, MASTER);
    assert_eq!(info.mac_addr, FAKE_MAC);
    assert!(!info.mac_addr.to_string().is_empty());
    assert_eq!(pod.pod_mac(), Some(FAKE_MAC));
    assert_eq!(
        provisioner.calls(),
        vec![LinkCall::Create {
            master: MASTER.to_string(),
            mode: IpvlanMode::L3,
            link: "eth0".to_string(),
        }]
    );
}

#[test]
fn test_create_uses_configured_mode() {
    let provisioner = Arc::new(FakeProvisioner::default());
    let pod = ipvlan(&provisioner).with_mode(IpvlanMode::L2);
    pod.create_pod_interface(&sample_add_request()).unwrap();

    assert!(matches!(
        provisioner.calls().as_slice(),
        [LinkCall::Create { mode: IpvlanMode::L2, .. }]
    ));
}

#[test]
fn test_create_failure_surfaces_provisioning_error() {
    let provisioner = Arc::new(FakeProvisioner::failing());
    let pod = ipvlan(&provisioner);

    let err = pod.create_pod_interface(&sample_add_request()).unwrap_err();

    assert!(matches!(err, Error::Link(LinkError::CommandFailed { .. })));
    assert!(err.to_string().contains("Operation not permitted"));
    assert_eq!(pod.pod_mac(), None);
    assert_eq!(provisioner.link_count(), 0);
    // No retry inside the contract
    assert_eq!(provisioner.calls().len(), 1);
}

#[test]
fn test_second_create_on_same_handle_is_rejected() {
    let provisioner = Arc::new(FakeProvisioner::default());
    let pod = ipvlan(&provisioner);
    pod.create_pod_interface(&sample_add_request()).unwrap();

    let err = pod.create_pod_interface(&sample_add_request()).unwrap_err();
    assert!(matches!(err, Error::AlreadyProvisioned(_)));
    assert_eq!(provisioner.calls().len(), 1);
}

#[test]
fn test_release_removes_created_link() {
    let provisioner = Arc::new(FakeProvisioner::strict());
    let pod = ipvlan(&provisioner);
    let request = sample_add_request();
    pod.create_pod_interface(&request).unwrap();

    pod.release_pod_interface(&request.del_request()).unwrap();
    assert_eq!(provisioner.link_count(), 0);
}

#[test]
fn test_release_without_create_surfaces_primitive_error() {
    let provisioner = Arc::new(FakeProvisioner::strict());
    let pod = ipvlan(&provisioner);

    let err = pod
        .release_pod_interface(&sample_add_request().del_request())
        .unwrap_err();

    match err {
        Error::Link(link) => assert!(link.is_missing_device()),
        other => panic!("expected a link error, got {other:?}"),
    }
}

#[test]
fn test_release_without_create_is_idempotent_for_tolerant_primitive() {
    let provisioner = Arc::new(FakeProvisioner::default());
    let pod = ipvlan(&provisioner);
    let del = sample_add_request().del_request();

    pod.release_pod_interface(&del).unwrap();
    pod.release_pod_interface(&del).unwrap();
}

#[test]
fn test_payload_preserves_addresses_and_order() {
    let mut request = sample_add_request();
    request.container_ips = vec![
        IpConfiguration::new("10.0.0.5/24", "10.0.0.1"),
        IpConfiguration::new("fd00:10::5/64", "fd00:10::1"),
        IpConfiguration::new("192.168.7.9/32", ""),
    ];

    let payload = create_network_request(&request);

    assert_eq!(payload.container_ips, request.container_ips);
    assert_eq!(payload.host_if_name, request.desired_host_interface_name);
    assert_eq!(payload.desired_host_interface_name, request.desired_host_interface_name);
}

#[test]
fn test_payload_with_no_addresses_is_empty_not_missing() {
    let mut request = sample_add_request();
    request.container_ips.clear();

    let payload = create_network_request(&request);
    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value["containerIps"], serde_json::json!([]));
}

#[tokio::test]
async fn test_setup_network_scenario() {
    let provisioner = Arc::new(FakeProvisioner::default());
    let pod = ipvlan(&provisioner);
    let agent = FakeAgent::new(AgentBehavior::Accept);
    let request = sample_add_request();

    let info = pod.create_pod_interface(&request).unwrap();
    let reply = pod
        .setup_network(&RequestContext::background(), &agent, &info, &request)
        .await
        .unwrap();

    assert!(reply.successful);
    assert_eq!(reply.error_message, "");
    assert_eq!(
        agent.created(),
        vec![CreateNetworkRequest {
            container_ips: vec![IpConfiguration::new("10.0.0.5/24", "10.0.0.1")],
            host_if_name: "eth-pod1".to_string(),
            desired_host_interface_name: "eth-pod1".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_setup_network_passes_rejection_through() {
    let provisioner = Arc::new(FakeProvisioner::default());
    let pod = ipvlan(&provisioner);
    let agent = FakeAgent::new(AgentBehavior::Reject("no free VF queues".to_string()));
    let request = sample_add_request();
    let info = pod.create_pod_interface(&request).unwrap();

    let reply = pod
        .setup_network(&RequestContext::background(), &agent, &info, &request)
        .await
        .unwrap();

    assert!(!reply.successful);
    assert_eq!(reply.error_message, "no free VF queues");
    // No compensating action on rejection
    assert_eq!(provisioner.link_count(), 1);
}

#[tokio::test]
async fn test_setup_network_transport_error_is_an_error() {
    let provisioner = Arc::new(FakeProvisioner::default());
    let pod = ipvlan(&provisioner);
    let agent = FakeAgent::new(AgentBehavior::Unreachable);
    let request = sample_add_request();
    let info = pod.create_pod_interface(&request).unwrap();

    let result = pod
        .setup_network(&RequestContext::background(), &agent, &info, &request)
        .await;

    assert!(matches!(result, Err(Error::Rpc(RpcError::Connect { .. }))));
    // Exactly one attempt
    assert_eq!(agent.created().len(), 1);
}

#[tokio::test]
async fn test_release_network_issues_teardown_call() {
    let provisioner = Arc::new(FakeProvisioner::default());
    let pod = ipvlan(&provisioner);
    let agent = FakeAgent::new(AgentBehavior::Accept);
    let del = sample_add_request().del_request();

    let reply = pod
        .release_network(&RequestContext::background(), &agent, &del)
        .await
        .unwrap();

    assert!(reply.successful);
    assert_eq!(
        agent.deleted(),
        vec![DeleteNetworkRequest {
            container_ips: vec![IpConfiguration::new("10.0.0.5/24", "10.0.0.1")],
            host_if_name: "eth-pod1".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_release_network_without_agent_support_is_not_success() {
    let provisioner = Arc::new(FakeProvisioner::default());
    let pod = ipvlan(&provisioner);
    let agent = FakeAgent::new(AgentBehavior::Unimplemented);

    let result = pod
        .release_network(&RequestContext::background(), &agent, &sample_add_request().del_request())
        .await;

    assert!(matches!(result, Err(Error::Rpc(RpcError::Unimplemented { .. }))));
}

#[tokio::test]
async fn test_release_network_passes_rejection_through() {
    let provisioner = Arc::new(FakeProvisioner::default());
    let pod = ipvlan(&provisioner);
    let agent = FakeAgent::new(AgentBehavior::Reject("unknown interface".to_string()));

    let reply = pod
        .release_network(&RequestContext::background(), &agent, &sample_add_request().del_request())
        .await
        .unwrap();

    assert!(!reply.successful);
    assert_eq!(reply.error_message, "unknown interface");
}

#[test]
fn test_factory_builds_ipvlan() {
    let provisioner = Arc::new(FakeProvisioner::default());
    let config = InterfaceConfig {
        interface_type: InterfaceType::Ipvlan,
        master: MASTER.to_string(),
        mode: IpvlanMode::L3s,
    };

    let pod = new_pod_interface(&config, provisioner.clone(), Span::none()).unwrap();
    let info = pod.create_pod_interface(&sample_add_request()).unwrap();

    assert_eq!(info.interface_name, MASTER);
    assert!(matches!(
        provisioner.calls().as_slice(),
        [LinkCall::Create { mode: IpvlanMode::L3s, .. }]
    ));
}

#[test]
fn test_factory_rejects_out_of_tree_variants() {
    for interface_type in [InterfaceType::Tap, InterfaceType::Sriov] {
        let config = InterfaceConfig {
            interface_type,
            master: MASTER.to_string(),
            mode: IpvlanMode::L3,
        };
        let result = new_pod_interface(&config, Arc::new(FakeProvisioner::default()), Span::none());
        assert!(matches!(result, Err(Error::UnsupportedInterfaceType(_))));
    }
}

#[test]
fn test_handles_for_different_pods_are_independent() {
    let provisioner = Arc::new(FakeProvisioner::default());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let provisioner = provisioner.clone();
            std::thread::spawn(move || {
                let pod = IpvlanPodInterface::new(MASTER, provisioner, Span::none());
                let mut request = sample_add_request();
                request.netns = format!("/var/run/netns/pod{i}");
                pod.create_pod_interface(&request).map(|info| info.mac_addr)
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), FAKE_MAC);
    }
    assert_eq!(provisioner.link_count(), 4);
}
