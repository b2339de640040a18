use anyhow::Result;
use enbsim::{EnbConfig, EnbDispatcher, ProcedureResult};
use enbsim_tests::{MockUe, framework::*};
use rrc::*;
use std::time::Duration;

#[async_std::test]
async fn no_setup_complete_is_recorded_as_error() -> Result<()> {
    let logger = init_logging();
    let enb = start_enb(enb_config(3, 500), &logger).await?;
    let ue = MockUe::new("ue-0", enb.local_addr(), &logger).await?;

    // Connection Request only, for UE key 0
    ue.send_connection_request(Crnti(0), 3434).await?;
    ue.receive_connection_setup().await?;

    async_std::task::sleep(Duration::from_millis(1200)).await;
    assert_eq!(enb.dispatcher().result(Crnti(0)), None);
    assert!(enb.dispatcher().results_by_ue().is_empty());

    async_std::task::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        enb.dispatcher().result(Crnti(0)),
        Some(ProcedureResult::ErrorNoConnectionCompleteMessage)
    );
    let context = enb.dispatcher().context(Crnti(0)).expect("context retained");
    assert_eq!(context.ue_identity.value, 3434);
    assert_eq!(context.nas_info, None);

    ue.stop().await;
    enb.graceful_shutdown().await;
    Ok(())
}

#[async_std::test]
async fn setup_complete_is_recorded_as_success() -> Result<()> {
    let logger = init_logging();
    let enb = start_enb(EnbConfig::default(), &logger).await?;
    let ue = MockUe::new("ue-0", enb.local_addr(), &logger).await?;

    ue.send_connection_request(Crnti(0), 3434).await?;
    let (_, rrc_transaction_identifier) = ue.receive_connection_setup().await?;
    ue.send_connection_setup_complete(rrc_transaction_identifier, NasMessageType::AttachRequest)
        .await?;

    let result = wait_for_result(&enb, Crnti(0), Duration::from_secs(1)).await?;
    assert_eq!(result, ProcedureResult::Success);
    let context = enb.dispatcher().context(Crnti(0)).expect("context present");
    assert_eq!(context.address, ue.address().await?);
    assert_eq!(
        context.nas_info.map(|n| n.nas_message_type),
        Some(NasMessageType::AttachRequest)
    );

    ue.stop().await;
    enb.graceful_shutdown().await;
    Ok(())
}

#[async_std::test]
async fn duplicate_setup_complete_leaves_success() -> Result<()> {
    let logger = init_logging();
    let enb = start_enb(EnbConfig::default(), &logger).await?;
    let ue = MockUe::new("ue-0", enb.local_addr(), &logger).await?;

    ue.send_connection_request(Crnti(0), 3434).await?;
    let (_, rrc_transaction_identifier) = ue.receive_connection_setup().await?;
    ue.send_connection_setup_complete(rrc_transaction_identifier, NasMessageType::AttachRequest)
        .await?;
    wait_for_result(&enb, Crnti(0), Duration::from_secs(1)).await?;
    let contexts = enb.dispatcher().contexts_by_ue();

    // Redeliver, this time with a different NAS message.  It must not reach the context.
    ue.send_connection_setup_complete(rrc_transaction_identifier, NasMessageType::DetachRequest)
        .await?;
    async_std::task::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        enb.dispatcher().result(Crnti(0)),
        Some(ProcedureResult::Success)
    );
    assert_eq!(enb.dispatcher().contexts_by_ue(), contexts);

    ue.stop().await;
    enb.graceful_shutdown().await;
    Ok(())
}

#[async_std::test]
async fn two_ues_resolve_independently() -> Result<()> {
    let logger = init_logging();
    let enb = start_enb(EnbConfig::default(), &logger).await?;
    let ue_0 = MockUe::new("ue-0", enb.local_addr(), &logger).await?;
    let ue_1 = MockUe::new("ue-1", enb.local_addr(), &logger).await?;

    ue_0.send_connection_request(Crnti(0), 1000).await?;
    ue_1.send_connection_request(Crnti(1), 1001).await?;
    let (key_0, transaction_0) = ue_0.receive_connection_setup().await?;
    let (key_1, transaction_1) = ue_1.receive_connection_setup().await?;
    assert_eq!((key_0, key_1), (Crnti(0), Crnti(1)));
    assert_ne!(transaction_0, transaction_1);

    ue_1.send_connection_setup_complete(transaction_1, NasMessageType::ServiceRequest)
        .await?;
    ue_0.send_connection_setup_complete(transaction_0, NasMessageType::AttachRequest)
        .await?;

    for key in [Crnti(0), Crnti(1)] {
        let result = wait_for_result(&enb, key, Duration::from_secs(1)).await?;
        assert_eq!(result, ProcedureResult::Success);
    }
    let contexts = enb.dispatcher().contexts_by_ue();
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[&Crnti(0)].ue_identity.value, 1000);
    assert_eq!(contexts[&Crnti(1)].ue_identity.value, 1001);
    assert_ne!(contexts[&Crnti(0)].address, contexts[&Crnti(1)].address);

    ue_0.stop().await;
    ue_1.stop().await;
    enb.graceful_shutdown().await;
    Ok(())
}

#[async_std::test]
async fn one_ue_failing_does_not_affect_another() -> Result<()> {
    let logger = init_logging();
    let enb = start_enb(enb_config(2, 200), &logger).await?;
    let ue_0 = MockUe::new("ue-0", enb.local_addr(), &logger).await?;
    let ue_1 = MockUe::new("ue-1", enb.local_addr(), &logger).await?;

    // UE 0 never completes.
    ue_0.send_connection_request(Crnti(0), 1000).await?;
    ue_1.send_connection_request(Crnti(1), 1001).await?;
    let (_, transaction_1) = ue_1.receive_connection_setup().await?;
    ue_1.send_connection_setup_complete(transaction_1, NasMessageType::AttachRequest)
        .await?;

    assert_eq!(
        wait_for_result(&enb, Crnti(1), Duration::from_secs(1)).await?,
        ProcedureResult::Success
    );
    assert_eq!(
        wait_for_result(&enb, Crnti(0), Duration::from_secs(1)).await?,
        ProcedureResult::ErrorNoConnectionCompleteMessage
    );
    assert_eq!(
        enb.dispatcher().result(Crnti(1)),
        Some(ProcedureResult::Success)
    );

    ue_0.stop().await;
    ue_1.stop().await;
    enb.graceful_shutdown().await;
    Ok(())
}

#[async_std::test]
async fn setup_complete_for_unknown_ue_is_dropped() -> Result<()> {
    let logger = init_logging();
    let enb = start_enb(EnbConfig::default(), &logger).await?;
    let ue = MockUe::new("ue-0", enb.local_addr(), &logger).await?;

    ue.send_connection_setup_complete(RrcTransactionIdentifier(9), NasMessageType::AttachRequest)
        .await?;
    ue.receive_nothing_within(Duration::from_millis(200)).await?;
    assert!(enb.dispatcher().results_by_ue().is_empty());
    assert!(enb.dispatcher().contexts_by_ue().is_empty());

    ue.stop().await;
    enb.graceful_shutdown().await;
    Ok(())
}

#[async_std::test]
async fn finished_ue_key_can_be_reused() -> Result<()> {
    let logger = init_logging();
    let enb = start_enb(enb_config(1, 200), &logger).await?;
    let ue = MockUe::new("ue-0", enb.local_addr(), &logger).await?;

    ue.send_connection_request(Crnti(0), 3434).await?;
    assert_eq!(
        wait_for_result(&enb, Crnti(0), Duration::from_secs(1)).await?,
        ProcedureResult::ErrorNoConnectionCompleteMessage
    );
    ue.receive_connection_setup().await?;

    // A new attempt on the same key starts a fresh procedure.
    ue.send_connection_request(Crnti(0), 3434).await?;
    let (_, rrc_transaction_identifier) = ue.receive_connection_setup().await?;
    assert_eq!(enb.dispatcher().result(Crnti(0)), None);
    ue.send_connection_setup_complete(rrc_transaction_identifier, NasMessageType::AttachRequest)
        .await?;
    assert_eq!(
        wait_for_result(&enb, Crnti(0), Duration::from_secs(1)).await?,
        ProcedureResult::Success
    );

    ue.stop().await;
    enb.graceful_shutdown().await;
    Ok(())
}

#[async_std::test]
async fn key_reused_as_procedure_expires_never_shows_old_result() -> Result<()> {
    let logger = init_logging();
    let enb = start_enb(enb_config(1, 300), &logger).await?;
    let ue = MockUe::new("ue-0", enb.local_addr(), &logger).await?;

    ue.send_connection_request(Crnti(0), 3434).await?;
    ue.receive_connection_setup().await?;

    // Keep asking across the moment the first procedure gives up.  The later requests start a
    // new procedure on the same key.
    async_std::task::sleep(Duration::from_millis(250)).await;
    for _ in 0..15 {
        ue.send_connection_request(Crnti(0), 3434).await?;
        async_std::task::sleep(Duration::from_millis(10)).await;
    }
    async_std::task::sleep(Duration::from_millis(50)).await;
    assert_eq!(enb.dispatcher().result(Crnti(0)), None);

    ue.send_connection_setup_complete(RrcTransactionIdentifier(0), NasMessageType::AttachRequest)
        .await?;
    assert_eq!(
        wait_for_result(&enb, Crnti(0), Duration::from_secs(1)).await?,
        ProcedureResult::Success
    );
    let context = enb.dispatcher().context(Crnti(0)).expect("context present");
    assert_eq!(
        context.nas_info.map(|n| n.nas_message_type),
        Some(NasMessageType::AttachRequest)
    );

    ue.stop().await;
    enb.graceful_shutdown().await;
    Ok(())
}

#[async_std::test]
async fn dropped_dispatcher_stops_answering() -> Result<()> {
    let logger = init_logging();
    let io = new_io_service("enb", &logger);
    let enb_address = io.start().await?;
    let dispatcher = EnbDispatcher::new(io.clone(), EnbConfig::default(), logger.clone())?;
    dispatcher.execute().await;
    let ue = MockUe::new("ue-0", enb_address, &logger).await?;
    ue.perform_random_access(5).await?;

    drop(dispatcher);
    ue.send(build::random_access_preamble(6)).await?;
    ue.receive_nothing_within(Duration::from_millis(200)).await?;

    ue.stop().await;
    io.stop().await;
    Ok(())
}

#[async_std::test]
async fn random_access_assigns_distinct_keys() -> Result<()> {
    let logger = init_logging();
    let enb = start_enb(EnbConfig::default(), &logger).await?;
    let ue_0 = MockUe::new("ue-0", enb.local_addr(), &logger).await?;
    let ue_1 = MockUe::new("ue-1", enb.local_addr(), &logger).await?;

    let (crnti_0, grant_0) = ue_0.perform_random_access(5).await?;
    let (crnti_1, grant_1) = ue_1.perform_random_access(5).await?;
    assert_ne!(crnti_0, crnti_1);
    assert_eq!((grant_0, grant_1), (34, 34));

    ue_0.stop().await;
    ue_1.stop().await;
    enb.graceful_shutdown().await;
    Ok(())
}

#[async_std::test]
async fn full_exchange_records_context() -> Result<()> {
    let logger = init_logging();
    let enb = start_enb(EnbConfig::default(), &logger).await?;
    let ue = MockUe::new("ue-0", enb.local_addr(), &logger).await?;

    let key = ue.perform_connection_establishment(77).await?;
    assert_eq!(
        wait_for_result(&enb, key, Duration::from_secs(1)).await?,
        ProcedureResult::Success
    );
    let context = enb.dispatcher().context(key).expect("context present");
    assert_eq!(context.key, key);
    assert_eq!(context.uplink_grant, 34);
    assert_eq!(context.ue_identity.identity_type, UeIdentityType::RandomValue);
    assert_eq!(context.ue_identity.value, 77);
    assert_eq!(context.selected_plmn_identity, Some(PlmnIdentity(2801)));

    ue.stop().await;
    enb.graceful_shutdown().await;
    Ok(())
}

#[async_std::test]
async fn execute_twice_is_harmless() -> Result<()> {
    let logger = init_logging();
    let enb = start_enb(EnbConfig::default(), &logger).await?;
    enb.dispatcher().execute().await;
    let ue = MockUe::new("ue-0", enb.local_addr(), &logger).await?;

    let key = ue.perform_connection_establishment(1).await?;
    assert_eq!(
        wait_for_result(&enb, key, Duration::from_secs(1)).await?,
        ProcedureResult::Success
    );

    ue.stop().await;
    enb.graceful_shutdown().await;
    Ok(())
}
