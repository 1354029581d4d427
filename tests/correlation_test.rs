//! Tests for upscale correlation: every resolved variant belongs to the
//! current grid, no message resolves two variants, and siblings survive
//! a timed-out variant.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{fast_tuning, snowflake_at, upscale_message, MockTransport};
use vermeer::gateway::GatewayEvent;
use vermeer::generation::{correlate_variant, CorrelationRequest, GridInfo, ProcessedSet};
use vermeer::observer::MessageObserver;
use vermeer::{GenerationErrorKind, Snowflake, UpscaleButton};

const CHANNEL: u64 = 700;

fn grid_info(grid_id: Snowflake, prompt: &str) -> GridInfo {
    GridInfo {
        message_id: grid_id,
        channel_id: Snowflake::from(CHANNEL),
        fingerprint: vermeer::fingerprint(prompt),
        prompt: prompt.to_string(),
        image_url: "https://cdn.discordapp.com/attachments/1/2/grid.png".into(),
    }
}

fn button(grid_id: Snowflake, variant_index: u8) -> UpscaleButton {
    UpscaleButton {
        message_id: grid_id,
        custom_id: format!("MJ::JOB::upsample::{}::job", variant_index + 1),
        label: format!("U{}", variant_index + 1),
        variant_index,
    }
}

fn request(
    grid: &GridInfo,
    variant_index: u8,
    processed: &ProcessedSet,
    timeout: Duration,
) -> CorrelationRequest {
    CorrelationRequest {
        grid: grid.clone(),
        button: button(grid.message_id, variant_index),
        user_session_id: "session-1".into(),
        processed: processed.clone(),
        timeout,
        clock_skew: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn four_variants_resolve_bijectively() {
    let token = CancellationToken::new();
    let tuning = fast_tuning();
    let observer = Arc::new(MessageObserver::new(
        tuning.reorder_grace,
        tuning.dedupe_capacity,
        &token,
    ));
    let transport = Arc::new(MockTransport::new());
    let channel = Snowflake::from(CHANNEL);

    let grid_id = snowflake_at(-2000);
    let grid = grid_info(grid_id, "cosmic dolphins in space");
    let processed = ProcessedSet::new();
    processed.claim(grid_id);

    // Each click triggers the matching upscale reply.
    let publisher = observer.publisher();
    transport.set_on_click(move |custom_id| {
        let variant: u8 = custom_id
            .split("::")
            .nth(3)
            .and_then(|v| v.parse().ok())
            .expect("custom id carries the variant");
        publisher.publish(GatewayEvent::MessageCreate(upscale_message(
            snowflake_at(variant as i64),
            channel,
            "cosmic dolphins in space",
            variant,
            Some(grid_id),
        )));
    });

    let mut tasks = tokio::task::JoinSet::new();
    for variant_index in 0..4u8 {
        let transport = transport.clone();
        let observer = observer.clone();
        let req = request(&grid, variant_index, &processed, Duration::from_secs(2));
        tasks.spawn(async move { correlate_variant(transport, &observer, req).await });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.expect("task completes"));
    }
    results.sort_by_key(|r| r.variant_index);

    assert_eq!(results.len(), 4);
    let mut message_ids = Vec::new();
    for (i, result) in results.iter().enumerate() {
        assert!(result.ok(), "variant {i} failed: {:?}", result.error);
        assert_eq!(result.variant_index, i as u8);
        assert_eq!(result.grid_message_id, grid_id);
        message_ids.push(result.message_id.expect("resolved variant has an id"));
    }
    // No message id resolved two variants.
    message_ids.sort();
    message_ids.dedup();
    assert_eq!(message_ids.len(), 4);
}

#[tokio::test]
async fn a_stale_upscale_from_the_previous_generation_is_excluded() {
    let token = CancellationToken::new();
    let tuning = fast_tuning();
    let observer = Arc::new(MessageObserver::new(
        tuning.reorder_grace,
        tuning.dedupe_capacity,
        &token,
    ));
    let transport = Arc::new(MockTransport::new());
    let channel = Snowflake::from(CHANNEL);

    let old_grid = snowflake_at(-60_000);
    let grid_id = snowflake_at(-1500);
    let grid = grid_info(grid_id, "fantasy castle with dragons");
    let processed = ProcessedSet::new();
    processed.claim(grid_id);

    let publisher = observer.publisher();
    transport.set_on_click(move |_| {
        // A straggler for the previous generation: different prompt,
        // old reply chain.
        publisher.publish(GatewayEvent::MessageCreate(upscale_message(
            snowflake_at(0),
            channel,
            "cosmic dolphins in space",
            1,
            Some(old_grid),
        )));
        // Then the genuine reply for this grid.
        publisher.publish(GatewayEvent::MessageCreate(upscale_message(
            snowflake_at(5),
            channel,
            "fantasy castle with dragons",
            1,
            Some(grid_id),
        )));
    });

    let result = correlate_variant(
        transport.clone(),
        &observer,
        request(&grid, 0, &processed, Duration::from_secs(2)),
    )
    .await;

    assert!(result.ok(), "variant failed: {:?}", result.error);
    assert_eq!(result.grid_message_id, grid_id);
    // The matched message quotes the current prompt's fingerprint.
    let claimed = result.message_id.expect("resolved");
    assert!(processed.contains(claimed));
}

#[tokio::test]
async fn timeout_resolves_the_variant_without_aborting_siblings() {
    let token = CancellationToken::new();
    let tuning = fast_tuning();
    let observer = Arc::new(MessageObserver::new(
        tuning.reorder_grace,
        tuning.dedupe_capacity,
        &token,
    ));
    let transport = Arc::new(MockTransport::new());
    let channel = Snowflake::from(CHANNEL);

    let grid_id = snowflake_at(-1500);
    let grid = grid_info(grid_id, "quiet harbor");
    let processed = ProcessedSet::new();
    processed.claim(grid_id);

    // Only variants 1 and 2 ever get replies; 3 and 4 stay silent.
    let publisher = observer.publisher();
    transport.set_on_click(move |custom_id| {
        let variant: u8 = custom_id
            .split("::")
            .nth(3)
            .and_then(|v| v.parse().ok())
            .expect("variant in custom id");
        if variant <= 2 {
            publisher.publish(GatewayEvent::MessageCreate(upscale_message(
                snowflake_at(variant as i64),
                channel,
                "quiet harbor",
                variant,
                Some(grid_id),
            )));
        }
    });

    let mut tasks = tokio::task::JoinSet::new();
    for variant_index in 0..4u8 {
        let transport = transport.clone();
        let observer = observer.clone();
        let req = request(&grid, variant_index, &processed, Duration::from_millis(400));
        tasks.spawn(async move { correlate_variant(transport, &observer, req).await });
    }
    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.expect("task completes"));
    }
    results.sort_by_key(|r| r.variant_index);

    assert!(results[0].ok());
    assert!(results[1].ok());
    for failed in &results[2..] {
        let error = failed.error.as_ref().expect("silent variant fails");
        assert!(matches!(
            error.kind,
            GenerationErrorKind::Correlation(_)
        ));
        assert_eq!(failed.grid_message_id, grid_id);
    }
}

#[tokio::test]
async fn reply_by_reference_matches_without_content() {
    let token = CancellationToken::new();
    let tuning = fast_tuning();
    let observer = Arc::new(MessageObserver::new(
        tuning.reorder_grace,
        tuning.dedupe_capacity,
        &token,
    ));
    let transport = Arc::new(MockTransport::new());
    let channel = Snowflake::from(CHANNEL);

    let grid_id = snowflake_at(-1500);
    let grid = grid_info(grid_id, "wordless");
    let processed = ProcessedSet::new();
    processed.claim(grid_id);

    let publisher = observer.publisher();
    transport.set_on_click(move |_| {
        // Content carries no variant naming at all, only the reply chain.
        let mut msg = upscale_message(snowflake_at(0), channel, "wordless", 1, Some(grid_id));
        msg.content = String::new();
        publisher.publish(GatewayEvent::MessageCreate(msg));
    });

    let result = correlate_variant(
        transport,
        &observer,
        request(&grid, 0, &processed, Duration::from_secs(2)),
    )
    .await;
    assert!(result.ok(), "reference match failed: {:?}", result.error);
}
