use npc_core::prelude::*;
use npc_tests::{at, ids, Harness};

#[tokio::test]
async fn humanoid_spawn_is_sent_in_order() -> anyhow::Result<()> {
    use ids::v1_8::*;

    let h = Harness::new(NpcConfig::default())?;
    h.platform.create_npc_with(|id| {
        NpcDefinition::humanoid(id, "Guide", at(0.0))
            .with_item(EquipmentSlot::MainHand, ItemStack::new(276, 0, 603, 1))
    })?;
    let conn = h.join(PlayerId(1), ProtocolVersion::V1_8, at(5.0));
    h.tick().await?;

    assert_eq!(
        h.transport.packet_ids(conn),
        vec![PLAYER_INFO, SPAWN_PLAYER, EQUIPMENT, METADATA, TEAMS, LOOK, HEAD_LOOK]
    );
    Ok(())
}

#[tokio::test]
async fn spawn_uses_the_viewers_protocol() -> anyhow::Result<()> {
    use ids::v1_16::*;

    let h = Harness::new(NpcConfig::default())?;
    h.humanoid("Guide", at(0.0))?;
    let conn = h.join(PlayerId(1), ProtocolVersion::V1_16_5, at(5.0));
    h.tick().await?;

    assert_eq!(
        h.transport.packet_ids(conn),
        vec![PLAYER_INFO, SPAWN_PLAYER, METADATA, TEAMS, LOOK, HEAD_LOOK]
    );
    Ok(())
}

#[tokio::test]
async fn mob_spawn_has_no_player_list_entry() -> anyhow::Result<()> {
    let h = Harness::new(NpcConfig::default())?;
    let sheep = EntityKind::Mob(TypeIds {
        legacy: 91,
        registry: 73,
    });
    h.platform
        .create_npc_with(|id| NpcDefinition::new(id, sheep, Profile::new("Sheep"), at(0.0)))?;
    let conn = h.join(PlayerId(1), ProtocolVersion::V1_8, at(5.0));
    h.tick().await?;

    let sent = h.transport.packet_ids(conn);
    assert_eq!(sent.first(), Some(&ids::v1_8::SPAWN_MOB));
    assert_eq!(h.transport.count(conn, ids::v1_8::PLAYER_INFO), 0);
    Ok(())
}

#[tokio::test]
async fn unchanged_state_sends_nothing() -> anyhow::Result<()> {
    let h = Harness::new(NpcConfig::default())?;
    let npc = h.humanoid("Guide", at(0.0))?;
    h.join(PlayerId(1), ProtocolVersion::V1_8, at(5.0));
    h.tick().await?;
    h.transport.clear();

    h.platform.update_npc(npc, NpcPatch::new())?;
    h.ticks(3).await?;
    assert_eq!(h.transport.total(), 0);
    Ok(())
}

#[tokio::test]
async fn flag_change_sends_one_metadata_packet() -> anyhow::Result<()> {
    let h = Harness::new(NpcConfig::default())?;
    let npc = h.humanoid("Guide", at(0.0))?;
    let conn = h.join(PlayerId(1), ProtocolVersion::V1_8, at(5.0));
    h.tick().await?;
    h.transport.clear();

    h.platform
        .update_npc(npc, NpcPatch::new().flags(EntityFlags::CROUCHED))?;
    h.tick().await?;
    assert_eq!(h.transport.packet_ids(conn), vec![ids::v1_8::METADATA]);
    Ok(())
}

#[tokio::test]
async fn short_move_is_relative() -> anyhow::Result<()> {
    let h = Harness::new(NpcConfig::default())?;
    let npc = h.humanoid("Guide", at(0.0))?;
    let conn = h.join(PlayerId(1), ProtocolVersion::V1_8, at(5.0));
    h.tick().await?;
    h.transport.clear();

    h.platform.update_npc(npc, NpcPatch::new().move_to(at(1.0)))?;
    h.tick().await?;
    assert_eq!(h.transport.packet_ids(conn), vec![ids::v1_8::REL_MOVE]);
    Ok(())
}

#[tokio::test]
async fn glow_change_updates_the_team() -> anyhow::Result<()> {
    let h = Harness::new(NpcConfig::default())?;
    let npc = h.humanoid("Guide", at(0.0))?;
    let conn = h.join(PlayerId(1), ProtocolVersion::V1_8, at(5.0));
    h.tick().await?;
    h.transport.clear();

    h.platform
        .update_npc(npc, NpcPatch::new().glow(Some(GlowColor::Red)))?;
    h.tick().await?;
    assert_eq!(h.transport.count(conn, ids::v1_8::TEAMS), 1);
    Ok(())
}

#[tokio::test]
async fn profile_change_respawns_in_one_batch() -> anyhow::Result<()> {
    use ids::v1_8::*;

    let h = Harness::new(NpcConfig::default())?;
    let npc = h.humanoid("Guide", at(0.0))?;
    let conn = h.join(PlayerId(1), ProtocolVersion::V1_8, at(5.0));
    h.tick().await?;
    h.transport.clear();

    h.platform
        .update_npc(npc, NpcPatch::new().profile(Profile::new("Renamed")))?;
    h.tick().await?;
    assert_eq!(
        h.transport.packet_ids(conn),
        vec![
            DESTROY,
            PLAYER_INFO,
            TEAMS,
            PLAYER_INFO,
            SPAWN_PLAYER,
            METADATA,
            TEAMS,
            LOOK,
            HEAD_LOOK
        ]
    );
    assert_eq!(h.platform.edge_state(npc, PlayerId(1)), EdgeState::Visible);
    Ok(())
}

#[tokio::test]
async fn remove_despawns_once_per_viewer() -> anyhow::Result<()> {
    use ids::v1_8::*;

    let h = Harness::new(NpcConfig::default())?;
    let npc = h.humanoid("Guide", at(0.0))?;
    let a = h.join(PlayerId(1), ProtocolVersion::V1_8, at(5.0));
    let b = h.join(PlayerId(2), ProtocolVersion::V1_8, at(-5.0));
    h.tick().await?;
    h.transport.clear();

    assert_eq!(h.platform.remove_npc(npc)?, 2);
    h.ticks(3).await?;
    for conn in [a, b] {
        assert_eq!(h.transport.packet_ids(conn), vec![DESTROY, PLAYER_INFO, TEAMS]);
    }

    assert!(matches!(
        h.platform.update_npc(npc, NpcPatch::new().move_to(at(1.0))),
        Err(RegistryError::Removed(_))
    ));
    assert!(matches!(h.platform.remove_npc(npc), Err(RegistryError::Removed(_))));
    assert!(h.platform.animate(npc, Animation::SwingMainArm).is_err());
    Ok(())
}

#[tokio::test]
async fn duplicate_ids_are_rejected_and_removed_ids_reusable() -> anyhow::Result<()> {
    let h = Harness::new(NpcConfig::default())?;
    let def = NpcDefinition::humanoid(NpcId(4242), "Guide", at(0.0));
    let npc = h.platform.create_npc(def.clone())?;
    assert!(matches!(
        h.platform.create_npc(def.clone()),
        Err(RegistryError::DuplicateId(_))
    ));

    h.platform.remove_npc(npc)?;
    let again = h.platform.create_npc(def)?;
    assert_eq!(again.id(), NpcId(4242));
    Ok(())
}

#[tokio::test]
async fn animation_reaches_every_viewer() -> anyhow::Result<()> {
    let h = Harness::new(NpcConfig::default())?;
    let npc = h.humanoid("Guide", at(0.0))?;
    let a = h.join(PlayerId(1), ProtocolVersion::V1_8, at(5.0));
    let b = h.join(PlayerId(2), ProtocolVersion::V1_16_5, at(-5.0));
    h.tick().await?;
    h.transport.clear();

    assert_eq!(h.platform.animate(npc, Animation::SwingMainArm)?, 2);
    h.platform.flush().await;
    assert_eq!(h.transport.packet_ids(a), vec![ids::v1_8::ANIMATION]);
    assert_eq!(h.transport.packet_ids(b), vec![ids::v1_16::ANIMATION]);
    Ok(())
}

#[tokio::test]
async fn look_at_turns_the_npc_for_everyone() -> anyhow::Result<()> {
    use ids::v1_8::*;

    let h = Harness::new(NpcConfig::default())?;
    let npc = h.humanoid("Guide", at(0.0))?;
    let conn = h.join(PlayerId(1), ProtocolVersion::V1_8, at(5.0));
    h.tick().await?;
    h.transport.clear();

    let turned = h.platform.look_at(npc, Vec3::new(10.0, 64.0, 0.0))?;
    assert!((turned.current.location.yaw + 90.0).abs() < 1e-3);
    h.tick().await?;
    assert_eq!(h.transport.packet_ids(conn), vec![LOOK, HEAD_LOOK]);
    Ok(())
}

#[tokio::test]
async fn player_list_entry_is_dropped_after_the_configured_delay() -> anyhow::Result<()> {
    use ids::v1_8::*;

    let h = Harness::new(NpcConfig {
        tab_removal_ticks: 5,
        ..NpcConfig::default()
    })?;
    let npc = h.humanoid("Guide", at(0.0))?;
    let conn = h.join(PlayerId(1), ProtocolVersion::V1_8, at(5.0));
    h.ticks(4).await?;
    assert_eq!(h.transport.player_list_removals(conn, PLAYER_INFO), 0);

    h.tick().await?;
    assert_eq!(h.transport.player_list_removals(conn, PLAYER_INFO), 1);
    assert_eq!(h.transport.packet_ids(conn).last(), Some(&PLAYER_INFO));
    assert_eq!(h.platform.edge_state(npc, PlayerId(1)), EdgeState::Visible);

    h.ticks(10).await?;
    assert_eq!(h.transport.player_list_removals(conn, PLAYER_INFO), 1);
    Ok(())
}

#[tokio::test]
async fn leaving_range_first_cancels_the_player_list_drop() -> anyhow::Result<()> {
    use ids::v1_8::*;

    let h = Harness::new(NpcConfig {
        tab_removal_ticks: 5,
        ..NpcConfig::default()
    })?;
    h.humanoid("Guide", at(0.0))?;
    let player = PlayerId(1);
    let conn = h.join(player, ProtocolVersion::V1_8, at(5.0));
    h.ticks(2).await?;

    h.world.teleport(player, at(500.0));
    h.platform.viewer_moved(player);
    h.ticks(10).await?;

    // only the despawn's own removal
    assert_eq!(h.transport.player_list_removals(conn, PLAYER_INFO), 1);
    assert_eq!(h.transport.count(conn, DESTROY), 1);
    Ok(())
}
