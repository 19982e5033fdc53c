//! The RPC surface between client and host.
//!
//! Client → host calls are named `request_*`; everything else flows from the
//! host to clients.

use crate::math::{Vec3, Vec4};
use crate::registry::{InstanceId, Uuid};
use crate::rpc::TypeRegistry;
use crate::states::{
    LoginState, NpcCombatState, PcCombatState, PhysicalState, SkillsState, StatDelta,
};

// Client -> host.

remote_call! {
    pub struct RequestEnterWorld("request_enter_world") {
        login: LoginState,
    }
}

remote_call! {
    /// One predicted movement step.
    pub struct RequestMove("request_move") {
        seq: u32,
        kb_dir: Vec3,
        kb_y_rot: f32,
        mouse_y_rot: f32,
    }
}

remote_call! {
    pub struct RequestJump("request_jump") {}
}

remote_call! {
    pub struct RequestToggleCombat("request_toggle_combat") {}
}

remote_call! {
    pub struct RequestSetTarget("request_set_target") {
        target: Option<Uuid>,
    }
}

remote_call! {
    pub struct RequestUsePower("request_use_power") {
        power: InstanceId,
    }
}

remote_call! {
    pub struct RequestMoveItem("request_move_item") {
        item: InstanceId,
        to_container: InstanceId,
        to_slot: u32,
    }
}

// Host -> client.

remote_call! {
    pub struct LoadZone("load_zone") {
        zone: String,
    }
}

remote_call! {
    /// The receiving client's own character.
    pub struct SpawnPc("spawn_pc") {
        uuid: Uuid,
        color: Vec4,
        combat: PcCombatState,
        physical: PhysicalState,
        skills: SkillsState,
        equipment: InstanceId,
        inventory: InstanceId,
        powers: Vec<InstanceId>,
    }
}

remote_call! {
    /// Any character the receiving client does not own.
    pub struct SpawnNpc("spawn_npc") {
        uuid: Uuid,
        color: Vec4,
        combat: NpcCombatState,
        physical: PhysicalState,
    }
}

remote_call! {
    pub struct RemoteKill("remote_kill") {
        uuid: Uuid,
    }
}

remote_call! {
    pub struct RemotePrint("remote_print") {
        message: String,
    }
}

remote_call! {
    pub struct UpdatePcCbState("update_pc_cbstate") {
        uuid: Uuid,
        state: PcCombatState,
    }
}

remote_call! {
    pub struct UpdateNpcCbState("update_npc_cbstate") {
        uuid: Uuid,
        state: NpcCombatState,
    }
}

remote_call! {
    /// Authoritative transform of the owner's character after input `seq`.
    pub struct UpdatePcLerpAttrs("update_pc_lerp_attrs") {
        seq: u32,
        position: Vec3,
        rotation: Vec3,
    }
}

remote_call! {
    pub struct UpdateNpcLerpAttrs("update_npc_lerp_attrs") {
        uuid: Uuid,
        position: Vec3,
        rotation: Vec3,
    }
}

remote_call! {
    pub struct UpdateNpcMoving("update_npc_moving") {
        uuid: Uuid,
        moving: bool,
    }
}

remote_call! {
    pub struct UpdatePcSkill("update_pc_skill") {
        skill: String,
        level: i32,
    }
}

remote_call! {
    pub struct RemoteAddItem("remote_add_item") {
        item: InstanceId,
        template: u32,
    }
}

remote_call! {
    pub struct RemoteAddPower("remote_add_power") {
        power: InstanceId,
        template: u32,
    }
}

remote_call! {
    pub struct RemoteUpdateContainer("remote_update_container") {
        container: InstanceId,
        items: Vec<Option<InstanceId>>,
    }
}

/// Registers every state record the protocol carries.
pub fn register_payload_types(types: &mut TypeRegistry) {
    types
        .register::<PhysicalState>()
        .register::<LoginState>()
        .register::<PcCombatState>()
        .register::<NpcCombatState>()
        .register::<StatDelta>()
        .register::<SkillsState>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{decode_frame, encode_frame, RemoteCall};

    #[test]
    fn spawn_pc_declares_its_payload_types() {
        let types = SpawnPc::payload_types();
        assert_eq!(types, ["PcCombatState", "PhysicalState", "SkillsState"]);
        assert!(RequestMove::payload_types().is_empty());

        let mut registry = TypeRegistry::default();
        register_payload_types(&mut registry);
        registry.assert_registered::<SpawnPc>();
        registry.assert_registered::<RequestEnterWorld>();
    }

    #[test]
    fn container_update_survives_the_wire() {
        let rpc = RemoteUpdateContainer {
            container: InstanceId(2),
            items: vec![None, Some(InstanceId(5)), None],
        };
        let back: RemoteUpdateContainer = decode_frame(encode_frame(&rpc)).unwrap().unwrap();
        assert_eq!(back, rpc);
    }

    #[test]
    fn set_target_carries_absent_target() {
        let rpc = RequestSetTarget { target: None };
        let frame = encode_frame(&rpc);
        // name (2 + 18) + presence flag
        assert_eq!(frame.len(), 2 + "request_set_target".len() + 1);
        let back: RequestSetTarget = decode_frame(frame).unwrap().unwrap();
        assert_eq!(back.target, None);
    }
}
