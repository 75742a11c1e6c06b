//! TypeScript Generation Tests
//!
//! Validates that the mirrored simulation types can be exported to TypeScript
//! when the tauri feature is enabled.

#[cfg(feature = "tauri")]
#[test]
fn test_core_types_implement_specta_type() {
    use specta::Type;

    // Compiling is the assertion: every type a frontend consumes must derive Type.
    fn assert_type<T: Type>() {}

    // Snapshot types
    assert_type::<lpwan_sync::SimulationId>();
    assert_type::<lpwan_sync::SimulationModel>();
    assert_type::<lpwan_sync::SimulationParameters>();
    assert_type::<lpwan_sync::ModelFrames>();
    assert_type::<lpwan_sync::ModelKind>();
    assert_type::<lpwan_sync::Frame>();
    assert_type::<lpwan_sync::FrameOutcome>();
    assert_type::<lpwan_sync::OutcomeCounts>();

    // Status types
    assert_type::<lpwan_sync::ConnectionStatus>();
    assert_type::<lpwan_sync::ChannelStatus>();
    assert_type::<lpwan_sync::SimulationPhase>();
    assert_type::<lpwan_sync::UpdateRate>();
    assert_type::<lpwan_sync::ChannelMessage>();
}

#[cfg(not(feature = "tauri"))]
#[test]
fn test_tauri_feature_disabled() {
    // Without the tauri feature the types still compile, just without specta::Type
    let _ = lpwan_sync::UpdateRate::Immediate;
    let _ = lpwan_sync::SimulationPhase::Created;
}
