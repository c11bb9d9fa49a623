use std::thread;

use anyhow::{Result, anyhow, bail};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use stereo_localization::atlas::SharedLandmarkMap;
use stereo_localization::config::TrackingConfig;
use stereo_localization::io::ReplaySession;
use stereo_localization::system::{RecordingPublisher, TrackingNode};
use stereo_localization::tracking::frame::RectifiedStereoBuilder;
use stereo_localization::tracking::{Collaborators, Tracker};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let session_path = args
        .next()
        .unwrap_or_else(|| "data/session".to_string());
    let config = match args.next() {
        Some(path) => TrackingConfig::load(&path)?,
        None => TrackingConfig::default(),
    };

    info!("Loading session from: {}", session_path);
    let session = ReplaySession::open(&session_path)?;
    if session.is_empty() {
        bail!("Session {} has no odometry entries", session_path);
    }
    info!(
        frames = session.len(),
        odom_topic = %config.topics().odometry,
        left_image_topic = %config.topics().left_image,
        odom_queue = config.queues.odometry,
        image_queue = config.queues.image,
        sync_window = config.queues.sync_window,
        node_channel = config.queues.node_channel,
        "Session loaded"
    );

    let map = SharedLandmarkMap::new();
    let publisher = RecordingPublisher::new();
    let tracker = Tracker::new(
        &config,
        Collaborators {
            transforms: Box::new(session.transforms()),
            extractor: Box::new(session.extractor()),
            camera_builder: Box::new(RectifiedStereoBuilder),
            map: Box::new(map.clone()),
            publisher: Box::new(publisher.clone()),
        },
    );

    let (node, sender) = TrackingNode::new(tracker, config.queues.node_channel);
    let observations: Vec<_> = session.observations().collect();
    let producer = thread::spawn(move || {
        for obs in observations {
            if !sender.send(obs) {
                break;
            }
        }
    });

    let (tracker, stats) = node.run();
    producer
        .join()
        .map_err(|_| anyhow!("Replay producer panicked"))?;

    let map = map.read();
    info!(
        received = stats.received,
        dropped = stats.dropped,
        tracked = stats.tracked,
        state = %tracker.state(),
        keyframes = map.num_keyframes(),
        landmarks = map.num_landmarks(),
        "Replay finished"
    );

    for record in publisher.records() {
        let t = record.estimated_pose.translation;
        println!(
            "{},{},{},{:.4},{:.4},{:.4}",
            record.timestamp_ns, record.state, record.inliers, t.x, t.y, t.z
        );
    }

    Ok(())
}
