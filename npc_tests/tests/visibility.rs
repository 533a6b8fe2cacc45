use npc_core::prelude::*;
use npc_tests::{at, ids, Harness, NETHER};
use std::collections::HashSet;

fn radius(r: f64) -> NpcConfig {
    NpcConfig {
        tracking_radius: r,
        action_radius: r.min(20.0),
        ..NpcConfig::default()
    }
}

#[tokio::test]
async fn radius_boundary_hides_and_shows() -> anyhow::Result<()> {
    let h = Harness::new(radius(32.0))?;
    let npc = h.humanoid("Guide", at(0.0))?;
    let player = PlayerId(1);
    h.join(player, ProtocolVersion::V1_8, at(30.0));
    h.tick().await?;
    assert_eq!(h.platform.edge_state(npc, player), EdgeState::Visible);

    h.world.teleport(player, at(40.0));
    h.platform.viewer_moved(player);
    assert_eq!(h.platform.edge_state(npc, player), EdgeState::NotTracked);

    h.world.teleport(player, at(10.0));
    h.platform.viewer_moved(player);
    assert_eq!(h.platform.edge_state(npc, player), EdgeState::Visible);

    let events = h.platform.drain_events();
    assert_eq!(
        events,
        vec![
            TrackingEvent::Shown { npc: npc.id(), player },
            TrackingEvent::Hidden {
                npc: npc.id(),
                player,
                reason: HideReason::OutOfRange
            },
            TrackingEvent::Shown { npc: npc.id(), player },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn reentering_range_respawns_fully() -> anyhow::Result<()> {
    use ids::v1_8::*;

    let h = Harness::new(NpcConfig::default())?;
    h.humanoid("Guide", at(0.0))?;
    let player = PlayerId(1);
    let conn = h.join(player, ProtocolVersion::V1_8, at(5.0));
    h.tick().await?;
    h.transport.clear();

    // periodic sweep, no explicit move notification
    h.world.teleport(player, at(100.0));
    h.ticks(2).await?;
    assert_eq!(h.transport.packet_ids(conn), vec![DESTROY, PLAYER_INFO, TEAMS]);
    h.transport.clear();

    h.world.teleport(player, at(5.0));
    h.ticks(2).await?;
    assert_eq!(
        h.transport.packet_ids(conn),
        vec![PLAYER_INFO, SPAWN_PLAYER, METADATA, TEAMS, LOOK, HEAD_LOOK]
    );
    Ok(())
}

#[tokio::test]
async fn changing_world_hides() -> anyhow::Result<()> {
    let h = Harness::new(NpcConfig::default())?;
    let npc = h.humanoid("Guide", at(0.0))?;
    let player = PlayerId(1);
    h.join(player, ProtocolVersion::V1_8, at(5.0));
    h.tick().await?;
    h.platform.drain_events();

    h.world
        .teleport(player, Location::new(NETHER, Vec3::new(0.0, 64.0, 0.0), 0.0, 0.0));
    h.platform.viewer_moved(player);
    assert_eq!(
        h.platform.drain_events(),
        vec![TrackingEvent::Hidden {
            npc: npc.id(),
            player,
            reason: HideReason::WorldChanged
        }]
    );
    Ok(())
}

#[tokio::test]
async fn audience_limits_who_sees_the_npc() -> anyhow::Result<()> {
    let h = Harness::new(NpcConfig::default())?;
    let insider = PlayerId(1);
    let outsider = PlayerId(2);
    let npc = h.platform.create_npc_with(|id| {
        NpcDefinition::humanoid(id, "Secret", at(0.0))
            .with_audience(Audience::Only(HashSet::from([insider])))
    })?;
    h.join(insider, ProtocolVersion::V1_8, at(5.0));
    let out_conn = h.join(outsider, ProtocolVersion::V1_8, at(5.0));
    h.ticks(2).await?;

    assert_eq!(h.platform.edge_state(npc, insider), EdgeState::Visible);
    assert_eq!(h.platform.edge_state(npc, outsider), EdgeState::NotTracked);
    assert!(h.transport.packet_ids(out_conn).is_empty());
    Ok(())
}

#[tokio::test]
async fn per_npc_radius_overrides_the_default() -> anyhow::Result<()> {
    let h = Harness::new(radius(32.0))?;
    let npc = h
        .platform
        .create_npc_with(|id| NpcDefinition::humanoid(id, "Far", at(0.0)).with_tracking_radius(80.0))?;
    let player = PlayerId(1);
    h.join(player, ProtocolVersion::V1_8, at(60.0));
    h.tick().await?;
    assert_eq!(h.platform.edge_state(npc, player), EdgeState::Visible);
    Ok(())
}

#[tokio::test]
async fn look_at_npc_turns_toward_a_moving_viewer() -> anyhow::Result<()> {
    use ids::v1_8::*;

    let h = Harness::new(NpcConfig::default())?;
    h.platform
        .create_npc_with(|id| NpcDefinition::humanoid(id, "Watcher", at(0.0)).looking_at_viewers())?;
    let player = PlayerId(1);
    let conn = h.join(player, ProtocolVersion::V1_8, at(5.0));
    h.ticks(2).await?;
    // the spawn batch already faced the viewer
    assert_eq!(h.transport.count(conn, LOOK), 1);
    h.transport.clear();

    h.world
        .teleport(player, Location::new(npc_tests::OVERWORLD, Vec3::new(0.0, 64.0, 5.0), 0.0, 0.0));
    h.ticks(2).await?;
    assert_eq!(h.transport.packet_ids(conn), vec![LOOK, HEAD_LOOK]);
    Ok(())
}

#[tokio::test]
async fn look_at_npc_turns_back_after_being_turned_away() -> anyhow::Result<()> {
    use ids::v1_8::*;

    let h = Harness::new(NpcConfig::default())?;
    let npc = h
        .platform
        .create_npc_with(|id| NpcDefinition::humanoid(id, "Watcher", at(0.0)).looking_at_viewers())?;
    let player = PlayerId(1);
    let conn = h.join(
        player,
        ProtocolVersion::V1_8,
        Location::new(npc_tests::OVERWORLD, Vec3::new(0.0, 64.0, 5.0), 0.0, 0.0),
    );
    h.ticks(2).await?;
    h.transport.clear();

    h.platform.look_at(npc, Vec3::new(100.0, 64.0, 0.0))?;
    h.ticks(2).await?;
    // turned away, then back toward the viewer who never moved
    assert_eq!(h.transport.packet_ids(conn), vec![LOOK, HEAD_LOOK, LOOK, HEAD_LOOK]);

    h.ticks(2).await?;
    assert_eq!(h.transport.count(conn, LOOK), 2);
    Ok(())
}

#[tokio::test]
async fn imitating_npc_mirrors_swings_within_action_radius() -> anyhow::Result<()> {
    let h = Harness::new(NpcConfig::default())?;
    h.platform
        .create_npc_with(|id| NpcDefinition::humanoid(id, "Mirror", at(0.0)).imitating_viewers())?;
    let near = PlayerId(1);
    let far = PlayerId(2);
    let near_conn = h.join(near, ProtocolVersion::V1_8, at(5.0));
    h.join(far, ProtocolVersion::V1_8, at(30.0));
    h.tick().await?;
    h.transport.clear();

    assert_eq!(h.platform.viewer_swung(near), 1);
    assert_eq!(h.platform.viewer_swung(far), 0);
    h.platform.flush().await;
    assert_eq!(h.transport.packet_ids(near_conn), vec![ids::v1_8::ANIMATION]);
    assert_eq!(h.transport.total(), 1);
    Ok(())
}
