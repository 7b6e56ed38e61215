//! Numeric OIDs for the MIB objects Zino polls and the traps it handles.
//!
//! Symbolic MIB compilation is out of scope; the monitor speaks a fixed,
//! small vocabulary.

/// SNMPv2-MIB::sysDescr.0
pub const SYS_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
/// SNMPv2-MIB::sysObjectID.0
pub const SYS_OBJECT_ID: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 2, 0];
/// SNMPv2-MIB::sysUpTime.0
pub const SYS_UPTIME: &[u32] = &[1, 3, 6, 1, 2, 1, 1, 3, 0];

/// Prefix of all enterprise sysObjectID values.
pub const ENTERPRISES: &[u32] = &[1, 3, 6, 1, 4, 1];

/// IF-MIB::ifDescr
pub const IF_DESCR: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 2];
/// IF-MIB::ifAdminStatus
pub const IF_ADMIN_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 7];
/// IF-MIB::ifOperStatus
pub const IF_OPER_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 8];
/// IF-MIB::ifLastChange
pub const IF_LAST_CHANGE: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 9];
/// IF-MIB::ifAlias
pub const IF_ALIAS: &[u32] = &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 18];
/// IF-MIB::ifIndex (appears in link trap varbinds)
pub const IF_INDEX: &[u32] = &[1, 3, 6, 1, 2, 1, 2, 2, 1, 1];

/// BGP4-MIB root.
pub const BGP4_MIB: &[u32] = &[1, 3, 6, 1, 2, 1, 15];
/// BGP4-MIB::bgpLocalAs.0
pub const BGP_LOCAL_AS: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 2, 0];
/// BGP4-MIB::bgpPeerState
pub const BGP_PEER_STATE: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 3, 1, 2];
/// BGP4-MIB::bgpPeerAdminStatus
pub const BGP_PEER_ADMIN_STATUS: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 3, 1, 3];
/// BGP4-MIB::bgpPeerRemoteAddr
pub const BGP_PEER_REMOTE_ADDR: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 3, 1, 7];
/// BGP4-MIB::bgpPeerRemoteAs
pub const BGP_PEER_REMOTE_AS: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 3, 1, 9];
/// BGP4-MIB::bgpPeerFsmEstablishedTime
pub const BGP_PEER_FSM_ESTABLISHED_TIME: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 3, 1, 16];

/// BGP4-V2-MIB-JUNIPER root (jnxBgpM2).
pub const JNX_BGP_M2: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1];
/// jnxBgpM2PeerState
pub const JNX_BGP_M2_PEER_STATE: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 2];
/// jnxBgpM2PeerStatus
pub const JNX_BGP_M2_PEER_STATUS: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 3];
/// jnxBgpM2PeerRemoteAddr
pub const JNX_BGP_M2_PEER_REMOTE_ADDR: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 11];
/// jnxBgpM2PeerRemoteAs
pub const JNX_BGP_M2_PEER_REMOTE_AS: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 13];
/// jnxBgpM2PeerLocalAs
pub const JNX_BGP_M2_PEER_LOCAL_AS: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 9];
/// jnxBgpM2PeerFsmEstablishedTime
pub const JNX_BGP_M2_PEER_FSM_ESTABLISHED_TIME: &[u32] =
    &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 6, 1, 1];

/// CISCO-BGP4-MIB::cbgpPeer2Table
pub const CBGP_PEER2_TABLE: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5];
/// cbgpPeer2State
pub const CBGP_PEER2_STATE: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5, 1, 3];
/// cbgpPeer2AdminStatus
pub const CBGP_PEER2_ADMIN_STATUS: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5, 1, 4];
/// cbgpPeer2RemoteAs
pub const CBGP_PEER2_REMOTE_AS: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5, 1, 11];
/// cbgpPeer2FsmEstablishedTime
pub const CBGP_PEER2_FSM_ESTABLISHED_TIME: &[u32] =
    &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5, 1, 19];
/// CISCO-BGP4-MIB::cbgpLocalAs.0
pub const CBGP_LOCAL_AS: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 3, 1, 0];

/// BFD-STD-MIB::bfdSessState
pub const BFD_SESS_STATE: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 1, 2, 1, 8];
/// BFD-STD-MIB::bfdSessDiscriminator
pub const BFD_SESS_DISCRIMINATOR: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 1, 2, 1, 2];
/// BFD-STD-MIB::bfdSessAddr
pub const BFD_SESS_ADDR: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 1, 2, 1, 5];
/// BFD-STD-MIB::bfdSessAddrType
pub const BFD_SESS_ADDR_TYPE: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 1, 2, 1, 4];

/// JUNIPER-ALARM-MIB::jnxYellowAlarmCount.0
pub const JNX_YELLOW_ALARM_COUNT: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 3, 4, 2, 3, 2, 0];
/// JUNIPER-ALARM-MIB::jnxRedAlarmCount.0
pub const JNX_RED_ALARM_COUNT: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 3, 4, 2, 2, 2, 0];

// Trap OIDs.

/// SNMPv2-MIB::coldStart
pub const TRAP_COLD_START: &[u32] = &[1, 3, 6, 1, 6, 3, 1, 1, 5, 1];
/// IF-MIB::linkDown
pub const TRAP_LINK_DOWN: &[u32] = &[1, 3, 6, 1, 6, 3, 1, 1, 5, 3];
/// IF-MIB::linkUp
pub const TRAP_LINK_UP: &[u32] = &[1, 3, 6, 1, 6, 3, 1, 1, 5, 4];
/// BGP4-MIB::bgpEstablished
pub const TRAP_BGP_ESTABLISHED: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 7, 1];
/// BGP4-MIB::bgpBackwardTransition
pub const TRAP_BGP_BACKWARD_TRANSITION: &[u32] = &[1, 3, 6, 1, 2, 1, 15, 7, 2];
/// BGP4-V2-MIB-JUNIPER::jnxBgpM2Established
pub const TRAP_JNX_BGP_M2_ESTABLISHED: &[u32] = &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 1, 0, 1];
/// BGP4-V2-MIB-JUNIPER::jnxBgpM2BackwardTransition
pub const TRAP_JNX_BGP_M2_BACKWARD_TRANSITION: &[u32] =
    &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 1, 0, 2];
/// BFD-STD-MIB::bfdSessUp
pub const TRAP_BFD_SESS_UP: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 0, 1];
/// BFD-STD-MIB::bfdSessDown
pub const TRAP_BFD_SESS_DOWN: &[u32] = &[1, 3, 6, 1, 2, 1, 222, 0, 2];
/// CISCO-CONFIG-MAN-MIB::ciscoConfigManEvent
pub const TRAP_CISCO_CONFIG_MAN_EVENT: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 9, 43, 2, 0, 1];
/// CISCO-RELOAD-MIB style reload notification
pub const TRAP_CISCO_RELOAD: &[u32] = &[1, 3, 6, 1, 4, 1, 9, 0, 0];
/// OSPF-TRAP-MIB::ospfIfConfigError
pub const TRAP_OSPF_IF_CONFIG_ERROR: &[u32] = &[1, 3, 6, 1, 2, 1, 14, 16, 2, 4];
