//! Read/write routing and failure handling across a master/replica set.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{bulk, concat, simple, MockConnector, ScriptedOpen};
use redis_forge::{
    cmd, ConnectionFactory, ConnectionParams, Execute, RedisError, ReplicationAggregate,
    ReplicationConfig, ReplicationStrategy, RespValue, Role,
};

fn node(host: &str, role: Role) -> ConnectionParams {
    ConnectionParams::default().with_host(host).with_role(role)
}

fn aggregate(connector: &Arc<MockConnector>, auto_discovery: bool) -> ReplicationAggregate {
    let factory = ConnectionFactory::new(connector.clone());
    ReplicationAggregate::with_config(
        factory,
        ReplicationStrategy::default(),
        ReplicationConfig { auto_discovery },
    )
}

#[test]
fn writes_route_to_the_master() {
    let connector = MockConnector::new();
    connector.script("m:6379", ScriptedOpen::Reply(simple("OK")));
    let mut agg = aggregate(&connector, false);
    agg.add(node("m", Role::Master)).unwrap();
    agg.add(node("r1", Role::Replica)).unwrap();

    let reply = agg.execute(&cmd("SET").arg("k").arg("v")).unwrap();
    assert_eq!(reply, RespValue::Boolean(true));
    assert!(!connector.written_to("m:6379").is_empty());
    assert!(connector.written_to("r1:6379").is_empty());
}

#[test]
fn reads_route_to_some_replica() {
    let connector = MockConnector::new();
    connector.script("r1:6379", ScriptedOpen::Reply(bulk("v")));
    connector.script("r2:6379", ScriptedOpen::Reply(bulk("v")));
    let mut agg = aggregate(&connector, false);
    agg.add(node("m", Role::Master)).unwrap();
    agg.add(node("r1", Role::Replica)).unwrap();
    agg.add(node("r2", Role::Replica)).unwrap();

    let reply = agg.execute(&cmd("GET").arg("k")).unwrap();
    assert_eq!(reply.as_string().unwrap(), "v");
    assert!(connector.written_to("m:6379").is_empty());
    let touched = usize::from(!connector.written_to("r1:6379").is_empty())
        + usize::from(!connector.written_to("r2:6379").is_empty());
    assert_eq!(touched, 1);
}

#[test]
fn replica_choice_varies_across_sessions() {
    let mut seen = HashSet::new();
    for _ in 0..100 {
        let connector = MockConnector::new();
        connector.script("r1:6379", ScriptedOpen::Reply(bulk("v")));
        connector.script("r2:6379", ScriptedOpen::Reply(bulk("v")));
        let mut agg = aggregate(&connector, false);
        agg.add(node("m", Role::Master)).unwrap();
        agg.add(node("r1", Role::Replica)).unwrap();
        agg.add(node("r2", Role::Replica)).unwrap();
        agg.execute(&cmd("GET").arg("k")).unwrap();
        for replica in ["r1:6379", "r2:6379"] {
            if !connector.written_to(replica).is_empty() {
                seen.insert(replica);
            }
        }
    }
    assert_eq!(seen.len(), 2, "both replicas should serve reads eventually");
}

#[test]
fn reads_after_a_write_stay_on_the_master() {
    let connector = MockConnector::new();
    connector.script(
        "m:6379",
        ScriptedOpen::Reply(concat(&[simple("OK"), bulk("v")])),
    );
    let mut agg = aggregate(&connector, false);
    agg.add(node("m", Role::Master)).unwrap();
    agg.add(node("r1", Role::Replica)).unwrap();

    agg.execute(&cmd("SET").arg("k").arg("v")).unwrap();
    let reply = agg.execute(&cmd("GET").arg("k")).unwrap();
    assert_eq!(reply.as_string().unwrap(), "v");
    assert!(connector.written_to("r1:6379").is_empty());
}

#[test]
fn a_dead_replica_is_dropped_and_the_read_retried() {
    let connector = MockConnector::new();
    // the only replica refuses; the retry lands on the master
    connector.script("r1:6379", ScriptedOpen::Refuse);
    connector.script("m:6379", ScriptedOpen::Reply(bulk("v")));
    let mut agg = aggregate(&connector, false);
    agg.add(node("m", Role::Master)).unwrap();
    agg.add(node("r1", Role::Replica)).unwrap();

    let reply = agg.execute(&cmd("GET").arg("k")).unwrap();
    assert_eq!(reply.as_string().unwrap(), "v");
    assert!(agg.replica_addrs().is_empty());
}

#[test]
fn a_dead_replica_triggers_rediscovery_before_the_retry() {
    let info = "# Replication\r\nrole:master\r\n\
        slave0:ip=10.0.0.5,port=6379,state=online,offset=1,lag=0\r\n";
    let connector = MockConnector::new();
    connector.script("r1:6379", ScriptedOpen::Refuse);
    connector.script("m:6379", ScriptedOpen::Reply(bulk(info)));
    connector.script("10.0.0.5:6379", ScriptedOpen::Reply(bulk("v")));
    let mut agg = aggregate(&connector, true);
    agg.add(node("m", Role::Master)).unwrap();
    agg.add(node("r1", Role::Replica)).unwrap();

    let reply = agg.execute(&cmd("GET").arg("k")).unwrap();
    assert_eq!(reply.as_string().unwrap(), "v");
    // the dead replica prompted a fresh probe of the surviving master
    assert_eq!(
        connector.written_to("m:6379"),
        b"*2\r\n$4\r\nINFO\r\n$11\r\nREPLICATION\r\n"
    );
    assert_eq!(agg.replica_addrs(), ["10.0.0.5:6379"]);
}

#[test]
fn master_failure_without_discovery_propagates() {
    let connector = MockConnector::new();
    connector.script("m:6379", ScriptedOpen::Refuse);
    let mut agg = aggregate(&connector, false);
    agg.add(node("m", Role::Master)).unwrap();

    let err = agg.execute(&cmd("SET").arg("k").arg("v")).unwrap_err();
    assert!(matches!(err, RedisError::Connection { .. }));
}

#[test]
fn write_without_a_master_fails_fast() {
    let connector = MockConnector::new();
    let mut agg = aggregate(&connector, false);
    agg.add(node("r1", Role::Replica)).unwrap();
    let err = agg.execute(&cmd("SET").arg("k").arg("v")).unwrap_err();
    assert!(matches!(err, RedisError::NoMaster));
}

#[test]
fn transaction_commands_are_rejected() {
    let connector = MockConnector::new();
    let mut agg = aggregate(&connector, false);
    agg.add(node("m", Role::Master)).unwrap();
    let err = agg.execute(&cmd("MULTI")).unwrap_err();
    assert!(matches!(err, RedisError::Unsupported(_)));
}

#[test]
fn discovery_rebuilds_the_replica_set_from_the_master() {
    let info = "# Replication\r\nrole:master\r\n\
        slave0:ip=10.0.0.2,port=6379,state=online,offset=1,lag=0\r\n\
        slave1:ip=10.0.0.3,port=6379,state=wait_bgsave,offset=0,lag=0\r\n";
    let connector = MockConnector::new();
    connector.script("m:6379", ScriptedOpen::Reply(bulk(info)));
    let mut agg = aggregate(&connector, true);
    agg.add(node("m", Role::Master)).unwrap();
    agg.add(node("stale:6379", Role::Replica)).unwrap();

    agg.discover().unwrap();
    assert_eq!(agg.master_addr(), Some("m:6379"));
    // the syncing slave is not added, the stale replica is dropped
    assert_eq!(agg.replica_addrs(), ["10.0.0.2:6379"]);
}

#[test]
fn master_failure_with_discovery_follows_the_replica_pointer() {
    let replica_info = "# Replication\r\nrole:slave\r\n\
        master_host:10.0.0.9\r\nmaster_port:6379\r\nmaster_link_status:up\r\n";
    let master_info = "# Replication\r\nrole:master\r\n";
    let connector = MockConnector::new();
    // the configured master is gone for good
    connector.script("m:6379", ScriptedOpen::Refuse);
    // the surviving replica serves the discovery probe, then the retried write
    // lands on the master it pointed at
    connector.script("r1:6379", ScriptedOpen::Reply(bulk(replica_info)));
    connector.script("10.0.0.9:6379", ScriptedOpen::Reply(concat(&[
        bulk(master_info),
        simple("OK"),
    ])));
    let mut agg = aggregate(&connector, true);
    agg.add(node("m", Role::Master)).unwrap();
    agg.add(node("r1", Role::Replica)).unwrap();

    let reply = agg.execute(&cmd("SET").arg("k").arg("v")).unwrap();
    assert_eq!(reply, RespValue::Boolean(true));
    assert_eq!(agg.master_addr(), Some("10.0.0.9:6379"));
}
