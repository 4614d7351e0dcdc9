// transport.rs
//
// The broker behind the event relay. `AmqpTransport` talks to RabbitMQ: each
// topic is a fanout exchange and every subscriber gets its own exclusive
// queue bound to it, so all gateways see every event. `InMemoryTransport`
// provides the same semantics inside one process.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc as std_mpsc;
use std::thread;

use amiquip::{
    Channel, Connection, ConsumerMessage, ConsumerOptions, ExchangeDeclareOptions, ExchangeType,
    FieldTable, Publish, QueueDeclareOptions, Result as AmiquipResult,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Raw payloads arriving on a subscribed topic.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { receiver }
    }

    /// Next payload, or `None` once the transport side has gone away.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }

    /// Next payload if one is already queued.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.try_recv().ok()
    }
}

/// Publish/subscribe channel with at-least-once delivery to each subscriber.
///
/// Both calls may block on network I/O; async callers go through
/// `spawn_blocking`.
pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;
}

/// In-process broker. Publishing to a topic nobody listens to drops the
/// payload.
#[derive(Default)]
pub struct InMemoryTransport {
    topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }
}

impl Transport for InMemoryTransport {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut topics = self.topics.lock();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|subscriber| subscriber.send(payload.to_vec()).is_ok());
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(sender);
        Ok(Subscription::new(receiver))
    }
}

struct AmqpPublisher {
    // Kept alive for the lifetime of the channel.
    _connection: Connection,
    channel: Channel,
    declared: HashSet<String>,
}

/// RabbitMQ transport.
pub struct AmqpTransport {
    url: String,
    publisher: Mutex<AmqpPublisher>,
}

impl AmqpTransport {
    /// Opens the publishing connection. Subscriptions open their own.
    pub fn connect(url: &str) -> Result<Self, TransportError> {
        let mut connection = Connection::insecure_open(url)?;
        let channel = connection.open_channel(None)?;
        log::info!("Connected to broker at {}", url);
        Ok(Self {
            url: url.to_string(),
            publisher: Mutex::new(AmqpPublisher {
                _connection: connection,
                channel,
                declared: HashSet::new(),
            }),
        })
    }
}

fn declare_topic(channel: &Channel, topic: &str) -> AmiquipResult<()> {
    channel.exchange_declare(
        ExchangeType::Fanout,
        topic,
        ExchangeDeclareOptions::default(),
    )?;
    Ok(())
}

impl Transport for AmqpTransport {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut publisher = self.publisher.lock();
        if !publisher.declared.contains(topic) {
            declare_topic(&publisher.channel, topic)?;
            publisher.declared.insert(topic.to_string());
        }
        publisher
            .channel
            .basic_publish(topic, Publish::new(payload, ""))?;
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let url = self.url.clone();
        let topic = topic.to_string();

        thread::spawn(move || {
            if let Err(e) = consume_topic(&url, &topic, sender, ready_tx) {
                log::warn!("Subscription to {} ended: {}", topic, e);
            }
        });

        match ready_rx.recv() {
            Ok(result) => result.map(|()| Subscription::new(receiver)),
            Err(_) => Err(TransportError::Closed),
        }
    }
}

type Ready = std_mpsc::SyncSender<Result<(), TransportError>>;

/// Hands a setup failure to the waiting `subscribe` call.
fn setup_step<T>(result: AmiquipResult<T>, ready: &Ready) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            let _ = ready.send(Err(TransportError::Amqp(e)));
            None
        }
    }
}

fn consume_topic(
    url: &str,
    topic: &str,
    sender: mpsc::UnboundedSender<Vec<u8>>,
    ready: Ready,
) -> AmiquipResult<()> {
    let Some(mut connection) = setup_step(Connection::insecure_open(url), &ready) else {
        return Ok(());
    };
    let Some(channel) = setup_step(connection.open_channel(None), &ready) else {
        return Ok(());
    };
    let Some(exchange) = setup_step(
        channel.exchange_declare(
            ExchangeType::Fanout,
            topic,
            ExchangeDeclareOptions::default(),
        ),
        &ready,
    ) else {
        return Ok(());
    };
    let options = QueueDeclareOptions {
        exclusive: true,
        auto_delete: true,
        ..QueueDeclareOptions::default()
    };
    let Some(queue) = setup_step(channel.queue_declare("", options), &ready) else {
        return Ok(());
    };
    if setup_step(queue.bind(&exchange, "", FieldTable::default()), &ready).is_none() {
        return Ok(());
    }
    let Some(consumer) = setup_step(queue.consume(ConsumerOptions::default()), &ready) else {
        return Ok(());
    };

    // `subscribe` may have stopped waiting; nothing else to tell it then.
    let _ = ready.send(Ok(()));
    log::info!("Subscribed to {} on queue {}", topic, queue.name());

    for message in consumer.receiver().iter() {
        match message {
            ConsumerMessage::Delivery(delivery) => {
                // Ack once the payload has been handed to the subscriber.
                if sender.send(delivery.body.clone()).is_err() {
                    break;
                }
                consumer.ack(delivery)?;
            }
            other => {
                log::warn!("Consumer for {} ended: {:?}", topic, other);
                break;
            }
        }
    }
    connection.close()
}
