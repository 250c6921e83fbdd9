use crate::correlation::Reply;
use crate::error::{Result, WampError};
use crate::session::{Command, Session};
use std::sync::Arc;
use wamp_proto::{Dict, List};

#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub extra: Dict,
}

/// Options for `publish`.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Request a PUBLISHED acknowledgement from the router. Without it
    /// the publish is fire-and-forget: the protocol gives the caller no
    /// way to observe delivery, and that is not an error.
    pub acknowledge: bool,
    pub extra: Dict,
}

impl PublishOptions {
    pub fn acknowledged() -> Self {
        Self {
            acknowledge: true,
            extra: Dict::new(),
        }
    }
}

/// A topic this session subscribed to.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: u64,
    pub topic: String,
}

impl Session {
    /// Subscribes to a topic. The handler runs in the dispatch loop
    /// once per EVENT, in transport arrival order; no deduplication or
    /// reordering happens here.
    pub async fn subscribe<F>(
        &self,
        topic: impl Into<String>,
        handler: F,
        options: SubscribeOptions,
    ) -> Result<Subscription>
    where
        F: Fn(List, Dict) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        let topic = topic.into();
        let reply = self
            .request(|replier| Command::Subscribe {
                topic: topic.clone(),
                options: options.extra,
                handler: Arc::new(handler),
                replier,
            })
            .await?;

        match reply {
            Reply::Subscribed { subscription_id } => Ok(Subscription {
                id: subscription_id,
                topic,
            }),
            other => Err(WampError::ProtocolViolation(format!(
                "mismatched reply for subscribe: {:?}",
                other
            ))),
        }
    }

    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        let reply = self
            .request(|replier| Command::Unsubscribe {
                subscription_id: subscription.id,
                replier,
            })
            .await?;

        match reply {
            Reply::Unsubscribed => Ok(()),
            other => Err(WampError::ProtocolViolation(format!(
                "mismatched reply for unsubscribe: {:?}",
                other
            ))),
        }
    }

    /// Publishes an event. With acknowledgement requested, suspends
    /// until PUBLISHED or ERROR and returns the publication id;
    /// otherwise returns `Ok(None)` as soon as the message is handed to
    /// the transport.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        args: List,
        kwargs: Dict,
        options: PublishOptions,
    ) -> Result<Option<u64>> {
        let reply = self
            .request(|replier| Command::Publish {
                topic: topic.into(),
                args,
                kwargs,
                options: options.extra,
                acknowledge: options.acknowledge,
                replier,
            })
            .await?;

        match reply {
            Reply::Published { publication_id } => Ok(Some(publication_id)),
            Reply::Accepted => Ok(None),
            other => Err(WampError::ProtocolViolation(format!(
                "mismatched reply for publish: {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::established;
    use serde_json::json;
    use tokio::sync::mpsc;
    use wamp_proto::{code, uri, Message};

    async fn subscribed(
        session: &Session,
        router: &mut crate::testkit::MockRouter,
        topic: &str,
        subscription_id: u64,
    ) -> (Subscription, mpsc::UnboundedReceiver<List>) {
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        let subscribe = session.subscribe(
            topic,
            move |args, _kwargs| {
                seen_tx.send(args).map_err(|e| e.to_string())
            },
            SubscribeOptions::default(),
        );

        let (subscription, _) = tokio::join!(subscribe, async {
            match router.recv().await {
                Message::Subscribe {
                    request_id, topic, ..
                } => {
                    assert!(!topic.is_empty());
                    router
                        .send(Message::Subscribed {
                            request_id,
                            subscription_id,
                        })
                        .await;
                }
                other => panic!("expected SUBSCRIBE, got {:?}", other),
            }
        });
        (subscription.unwrap(), seen_rx)
    }

    #[tokio::test]
    async fn test_event_delivered_to_handler_exactly_once() {
        let (session, mut router) = established("realm1").await;
        let (subscription, mut seen) =
            subscribed(&session, &mut router, "com.example.topic", 8101).await;
        assert_eq!(subscription.topic, "com.example.topic");

        router
            .send(Message::Event {
                subscription_id: 8101,
                publication_id: 1,
                details: Dict::new(),
                args: vec![json!("hello")],
                kwargs: Dict::new(),
            })
            .await;

        assert_eq!(seen.recv().await.unwrap(), vec![json!("hello")]);

        // Exactly once: nothing else pending after a quick settle.
        tokio::task::yield_now().await;
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_arrive_in_transport_order() {
        let (session, mut router) = established("realm1").await;
        let (_subscription, mut seen) =
            subscribed(&session, &mut router, "com.example.seq", 22).await;

        for i in 0..4i64 {
            router
                .send(Message::Event {
                    subscription_id: 22,
                    publication_id: 100 + i as u64,
                    details: Dict::new(),
                    args: vec![json!(i)],
                    kwargs: Dict::new(),
                })
                .await;
        }

        for i in 0..4i64 {
            assert_eq!(seen.recv().await.unwrap(), vec![json!(i)]);
        }
    }

    #[tokio::test]
    async fn test_publish_fire_and_forget_returns_immediately() {
        let (session, mut router) = established("realm1").await;

        // No router response is ever sent; publish must not wait.
        let publication = session
            .publish(
                "com.example.topic",
                vec![json!("hello")],
                Dict::new(),
                PublishOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(publication, None);

        match router.recv().await {
            Message::Publish { topic, options, args, .. } => {
                assert_eq!(topic, "com.example.topic");
                assert_eq!(args, vec![json!("hello")]);
                assert!(!options.contains_key("acknowledge"));
            }
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_acknowledged_waits_for_published() {
        let (session, mut router) = established("realm1").await;

        let publish = session.publish(
            "com.example.topic",
            vec![json!(1)],
            Dict::new(),
            PublishOptions::acknowledged(),
        );

        let (result, _) = tokio::join!(publish, async {
            match router.recv().await {
                Message::Publish {
                    request_id,
                    options,
                    ..
                } => {
                    assert_eq!(options.get("acknowledge"), Some(&json!(true)));
                    router
                        .send(Message::Published {
                            request_id,
                            publication_id: 6004,
                        })
                        .await;
                }
                other => panic!("expected PUBLISH, got {:?}", other),
            }
        });

        assert_eq!(result.unwrap(), Some(6004));
    }

    #[tokio::test]
    async fn test_publish_acknowledged_error_surfaces() {
        let (session, mut router) = established("realm1").await;

        let publish = session.publish(
            "forbidden.topic",
            vec![],
            Dict::new(),
            PublishOptions::acknowledged(),
        );

        let (result, _) = tokio::join!(publish, async {
            match router.recv().await {
                Message::Publish { request_id, .. } => {
                    router
                        .send(Message::Error {
                            request_type: code::PUBLISH,
                            request_id,
                            details: Dict::new(),
                            error: uri::NOT_AUTHORIZED.to_string(),
                            args: vec![],
                            kwargs: Dict::new(),
                        })
                        .await;
                }
                other => panic!("expected PUBLISH, got {:?}", other),
            }
        });

        match result {
            Err(WampError::Application { error, .. }) => assert_eq!(error, uri::NOT_AUTHORIZED),
            other => panic!("expected application error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (session, mut router) = established("realm1").await;
        let (subscription, mut seen) =
            subscribed(&session, &mut router, "com.example.topic", 404).await;

        let unsubscribe = session.unsubscribe(&subscription);
        let (result, _) = tokio::join!(unsubscribe, async {
            match router.recv().await {
                Message::Unsubscribe {
                    request_id,
                    subscription_id,
                } => {
                    assert_eq!(subscription_id, 404);
                    router.send(Message::Unsubscribed { request_id }).await;
                }
                other => panic!("expected UNSUBSCRIBE, got {:?}", other),
            }
        });
        result.unwrap();

        // A straggler EVENT is logged and dropped, and the session
        // stays up.
        router
            .send(Message::Event {
                subscription_id: 404,
                publication_id: 9,
                details: Dict::new(),
                args: vec![json!("ghost")],
                kwargs: Dict::new(),
            })
            .await;

        let publication = session
            .publish("com.example.alive", vec![], Dict::new(), PublishOptions::default())
            .await
            .unwrap();
        assert_eq!(publication, None);
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failing_event_handler_does_not_poison_dispatch() {
        let (session, mut router) = established("realm1").await;

        let subscribe = session.subscribe(
            "com.example.topic",
            |_args, _kwargs| Err("handler exploded".to_string()),
            SubscribeOptions::default(),
        );
        let (subscription, _) = tokio::join!(subscribe, async {
            match router.recv().await {
                Message::Subscribe { request_id, .. } => {
                    router
                        .send(Message::Subscribed {
                            request_id,
                            subscription_id: 1,
                        })
                        .await;
                }
                other => panic!("expected SUBSCRIBE, got {:?}", other),
            }
        });
        subscription.unwrap();

        router
            .send(Message::Event {
                subscription_id: 1,
                publication_id: 2,
                details: Dict::new(),
                args: vec![],
                kwargs: Dict::new(),
            })
            .await;

        // The failure was caught at the dispatch boundary.
        let publication = session
            .publish("com.example.next", vec![], Dict::new(), PublishOptions::default())
            .await
            .unwrap();
        assert_eq!(publication, None);
    }
}
