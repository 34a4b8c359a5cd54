//! Scripted unread session over the in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use huddle_core::{Clock, GroupId, ManualClock, SystemClock, Timestamp, UserId};
use huddle_storage::{InMemoryMembershipDirectory, InMemoryMessageFeed, InMemoryWatermarkStore};
use huddle_unread::{SummaryStream, UnreadConfig, UnreadTracker};
use tracing::info;

/// Shape of the simulated session
#[derive(Debug, Clone)]
pub struct Scenario {
    pub groups: u32,
    pub backlog: u32,
    /// Pause between steps so the engine can settle
    pub step: Duration,
}

struct World {
    directory: Arc<InMemoryMembershipDirectory>,
    watermarks: Arc<InMemoryWatermarkStore>,
    feed: Arc<InMemoryMessageFeed>,
    clock: Arc<ManualClock>,
    me: UserId,
    friend: UserId,
}

impl World {
    fn new() -> anyhow::Result<Self> {
        Ok(Self {
            directory: Arc::new(InMemoryMembershipDirectory::new()),
            watermarks: Arc::new(InMemoryWatermarkStore::new()),
            feed: Arc::new(InMemoryMessageFeed::new()),
            clock: Arc::new(ManualClock::new(SystemClock.now())),
            me: UserId::new("demo")?,
            friend: UserId::new("friend")?,
        })
    }

    fn post(&self, group: &GroupId, n: u32) -> anyhow::Result<()> {
        for _ in 0..n {
            let at = self.clock.advance(1);
            self.feed.post_at(group, &self.friend, at)?;
        }
        Ok(())
    }
}

fn group_id(n: u32) -> anyhow::Result<GroupId> {
    Ok(GroupId::new(format!("group-{}", n))?)
}

/// Seed groups, start the engine and drive it through joins, leaves, new
/// messages and mark-as-read.
pub async fn run(scenario: Scenario, config: UnreadConfig) -> anyhow::Result<()> {
    let world = World::new()?;
    let now = world.clock.now();

    // Backlog sits before "now". Even-numbered groups already have a
    // watermark halfway through it; the rest have never been opened.
    let backlog = i64::from(scenario.backlog);
    let mut groups = Vec::new();
    for n in 1..=scenario.groups {
        let group = group_id(n)?;
        for i in 0..backlog {
            let at = Timestamp::from_millis(now.as_millis() - backlog * 1_000 + i * 1_000);
            world.feed.post_at(&group, &world.friend, at)?;
        }
        if n % 2 == 0 {
            let halfway = Timestamp::from_millis(now.as_millis() - backlog * 500);
            world.watermarks.seed(&group, &world.me, halfway);
        }
        world.directory.join(&world.me, &group);
        groups.push(group);
    }
    info!(groups = scenario.groups, backlog = scenario.backlog, "Seeded collaborators");

    let engine = UnreadTracker::new(
        world.directory.clone(),
        world.watermarks.clone(),
        world.feed.clone(),
        world.clock.clone(),
        config,
    )?;
    let (summaries, handle) = engine.start(&world.me);
    let printer = tokio::spawn(print_summaries(summaries));
    tokio::time::sleep(scenario.step).await;

    let first = &groups[0];
    info!(group = %first, "Step: new messages");
    world.post(first, 3)?;
    tokio::time::sleep(scenario.step).await;

    info!(group = %first, "Step: mark as read");
    world.clock.advance(1);
    engine.mark_group_read(first, &world.me);
    tokio::time::sleep(scenario.step).await;

    if let Some(last) = groups.last().filter(|last| *last != first) {
        info!(group = %last, "Step: leave group");
        world.directory.leave(&world.me, last);
        tokio::time::sleep(scenario.step).await;
    }

    let joined = group_id(scenario.groups + 1)?;
    info!(group = %joined, "Step: join group");
    world.directory.join(&world.me, &joined);
    tokio::time::sleep(scenario.step).await;
    world.post(&joined, 2)?;
    tokio::time::sleep(scenario.step).await;

    handle.shutdown().await;
    printer.await.context("summary printer panicked")??;
    Ok(())
}

async fn print_summaries(mut summaries: SummaryStream) -> anyhow::Result<()> {
    while let Some(item) = summaries.next().await {
        let summary = item?;
        println!("{}", serde_json::to_string(&summary)?);
    }
    Ok(())
}
