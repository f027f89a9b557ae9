//! 비동기 알림 디스패처.
//!
//! 트레이딩 경로는 `notify`로 이벤트를 큐에 넣기만 하고 기다리지 않습니다.
//! 전송은 백그라운드 태스크가 담당하며, 전송 실패는 로그로만 남습니다.

use crate::types::{Notification, NotificationEvent, NotificationResult, NotificationSender};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// 알림 디스패처 핸들. 복제해서 여러 컴포넌트가 공유합니다.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: Option<mpsc::Sender<Notification>>,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("enabled", &self.tx.is_some())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl NotificationDispatcher {
    /// 전송기 목록으로 디스패처를 시작합니다.
    ///
    /// 취소 토큰이 취소되면 큐에 남은 알림을 모두 전송한 뒤 종료합니다.
    pub fn spawn(
        senders: Vec<Arc<dyn NotificationSender>>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(deliver_loop(rx, senders, cancel));
        (
            Self {
                tx: Some(tx),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        )
    }

    /// 알림을 보내지 않는 디스패처.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 이벤트를 큐에 넣습니다. 큐가 가득 차면 버리고 카운터를 올립니다.
    pub fn notify(&self, event: NotificationEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        let notification = Notification::new(event);
        let kind = notification.event.kind();
        let user_id = notification.user_id();
        match tx.try_send(notification) {
            Ok(()) => debug!(kind, user_id = %user_id, "알림 큐 등록"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(kind, user_id = %user_id, dropped, "알림 큐 가득 참, 알림 폐기");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(kind, user_id = %user_id, "알림 디스패처 종료됨");
            }
        }
    }

    /// 폐기된 알림 수.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn deliver_loop(
    mut rx: mpsc::Receiver<Notification>,
    senders: Vec<Arc<dyn NotificationSender>>,
    cancel: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            received = rx.recv() => match received {
                Some(n) => n,
                None => break,
            },
            _ = cancel.cancelled() => {
                rx.close();
                while let Ok(n) = rx.try_recv() {
                    deliver(&senders, &n).await;
                }
                break;
            }
        };
        deliver(&senders, &notification).await;
    }
    debug!("알림 디스패처 종료");
}

async fn deliver(senders: &[Arc<dyn NotificationSender>], notification: &Notification) {
    for sender in senders.iter().filter(|s| s.is_enabled()) {
        if let Err(e) = sender.send(notification).await {
            error!(
                sender = sender.name(),
                kind = notification.event.kind(),
                error = %e,
                "알림 전송 실패"
            );
        }
    }
}

/// 받은 알림을 메모리에 보관하는 전송기 (테스트/페이퍼 모드).
#[derive(Debug, Default)]
pub struct MemorySender {
    received: Mutex<Vec<Notification>>,
}

impl MemorySender {
    /// 새 전송기를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 지금까지 받은 알림.
    pub fn notifications(&self) -> Vec<Notification> {
        match self.received.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 종류별 수.
    pub fn count(&self, kind: &str) -> usize {
        self.notifications()
            .iter()
            .filter(|n| n.event.kind() == kind)
            .count()
    }
}

#[async_trait]
impl NotificationSender for MemorySender {
    async fn send(&self, notification: &Notification) -> NotificationResult<()> {
        match self.received.lock() {
            Ok(mut guard) => guard.push(notification.clone()),
            Err(poisoned) => poisoned.into_inner().push(notification.clone()),
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "memory"
    }
}
