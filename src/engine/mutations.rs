use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::fee::fee_percent;
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::store::Condition;

use super::promotion::PromotionPlan;
use super::state::{self, Transition};
use super::{BookingError, Engine, keep, record};

fn check_label(label: &Option<String>) -> Result<(), BookingError> {
    if label.as_ref().is_some_and(|l| l.len() > MAX_LABEL_LEN) {
        return Err(BookingError::LimitExceeded("label too long"));
    }
    Ok(())
}

fn check_reason(reason: &str) -> Result<(), BookingError> {
    if reason.trim().is_empty() {
        return Err(BookingError::InvalidRequest("a rejection reason is required"));
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(BookingError::LimitExceeded("reason too long"));
    }
    Ok(())
}

fn check_bulk(ids: &[BookingId]) -> Result<(), BookingError> {
    if ids.len() > MAX_BULK_IDS {
        return Err(BookingError::LimitExceeded("too many bookings in one request"));
    }
    Ok(())
}

impl Engine {
    pub async fn create(&self, owner: UserId, request: CreateBooking) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.create_inner(owner, request).await;
        record("create", started, &result);
        result
    }

    async fn create_inner(&self, owner: UserId, request: CreateBooking) -> Result<Booking, BookingError> {
        self.config
            .rules
            .validate_interval(&request.span, &self.config.calendar, self.now())?;
        check_label(&request.label)?;

        let id = Ulid::new();
        let booking = with_retries!(self, "create", self.try_create(id, owner, &request))?;
        info!(
            "booking {id} created for {owner}: {} rank {}",
            booking.booking_type, booking.rank
        );
        self.notify.send(BookingEvent::Created {
            id,
            owner,
            span: booking.span,
            rank: booking.rank,
        });
        Ok(booking)
    }

    async fn try_create(
        &self,
        id: BookingId,
        owner: UserId,
        request: &CreateBooking,
    ) -> Result<Booking, BookingError> {
        let now = self.now();
        if request.booking_type == BookingType::Temporary {
            let held = self
                .bookings()
                .await?
                .into_iter()
                .filter(|b| {
                    b.owner == owner
                        && b.booking_type == BookingType::Temporary
                        && b.status.is_active()
                })
                .count();
            if held >= self.config.rules.max_temporary_per_user {
                return Err(BookingError::LimitExceeded("too many temporary bookings"));
            }
        }

        let snapshot = self.snapshot(&[request.span]).await?;
        let resolution = keep::resolve(&request.span, &snapshot.entries, None);
        if !resolution.admit {
            metrics::counter!(observability::KEEP_LIMIT_REJECTIONS_TOTAL).increment(1);
            return Err(BookingError::KeepLimitExceeded);
        }

        let temporary = request.booking_type == BookingType::Temporary;
        let booking = Booking {
            id,
            owner,
            span: request.span,
            booking_type: request.booking_type,
            status: BookingStatus::Pending,
            rank: resolution.rank,
            confirmation_deadline: temporary
                .then(|| self.scheduler.confirmation_deadline(request.span.start)),
            cancellation_fee_percent: fee_percent(request.span.start, request.booking_type, now),
            label: request.label.clone(),
            created_at: now,
            updated_at: now,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            admin_comment: None,
            cancelled_by: None,
            cancelled_at: None,
            cancellation_reason: None,
        };

        let mut txn = self.txn();
        txn.observe(&snapshot);
        txn.put_booking(&booking, Condition::NotExists);
        txn.put_slot(&booking);
        self.commit(txn).await?;
        Ok(booking)
    }

    /// Move a pending booking. Its rank is re-resolved at the new interval,
    /// and holders it leaves behind move up in the same commit.
    pub async fn update_times(
        &self,
        actor: Actor,
        id: BookingId,
        request: UpdateTimes,
    ) -> Result<Release, BookingError> {
        let started = Instant::now();
        let result = self.update_times_inner(actor, id, request).await;
        record("update_times", started, &result);
        result
    }

    async fn update_times_inner(
        &self,
        actor: Actor,
        id: BookingId,
        request: UpdateTimes,
    ) -> Result<Release, BookingError> {
        self.config
            .rules
            .validate_interval(&request.span, &self.config.calendar, self.now())?;

        let (previous, moved, plan) =
            with_retries!(self, "update_times", self.try_update_times(&actor, id, request.span))?;
        if previous.span == moved.span {
            return Ok(Release {
                freed_rank: previous.rank,
                booking: moved,
                promotion: Ok(Vec::new()),
            });
        }
        info!("booking {id} moved, rank {} -> {}", previous.rank, moved.rank);
        self.notify.send(BookingEvent::Moved {
            id,
            span: moved.span,
            rank: moved.rank,
        });
        let promotion = self.finish_promotion(plan).await;
        Ok(Release {
            booking: moved,
            freed_rank: previous.rank,
            promotion,
        })
    }

    async fn try_update_times(
        &self,
        actor: &Actor,
        id: BookingId,
        span: Span,
    ) -> Result<(Booking, Booking, PromotionPlan), BookingError> {
        let now = self.now();
        let (current, version) = self.load_for(actor, id).await?;
        state::ensure_updatable(&current)?;
        if current.span == span {
            return Ok((current.clone(), current, PromotionPlan::default()));
        }

        let snapshot = self.snapshot(&[current.span, span]).await?;
        let resolution = keep::resolve(&span, &snapshot.entries, Some(id));
        if !resolution.admit {
            metrics::counter!(observability::KEEP_LIMIT_REJECTIONS_TOTAL).increment(1);
            return Err(BookingError::KeepLimitExceeded);
        }

        let mut moved = current.clone();
        moved.span = span;
        moved.rank = resolution.rank;
        moved.updated_at = now;
        if moved.booking_type == BookingType::Temporary {
            moved.confirmation_deadline = Some(self.scheduler.confirmation_deadline(span.start));
        }
        moved.cancellation_fee_percent = fee_percent(span.start, moved.booking_type, now);

        let mut txn = self.txn();
        txn.observe(&snapshot);
        txn.put_booking(&moved, Condition::VersionIs(version));
        txn.delete_slot(&current);
        txn.put_slot(&moved);
        let plan = self.stage_promotion(&mut txn, &current, &snapshot).await?;
        self.commit(txn).await?;
        Ok((current, moved, plan))
    }

    pub async fn approve(
        &self,
        approver: UserId,
        id: BookingId,
        approval: Approval,
    ) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.approve_inner(approver, id, approval).await;
        record("approve", started, &result);
        result
    }

    async fn approve_inner(
        &self,
        approver: UserId,
        id: BookingId,
        approval: Approval,
    ) -> Result<Booking, BookingError> {
        if approval
            .admin_comment
            .as_ref()
            .is_some_and(|c| c.len() > MAX_REASON_LEN)
        {
            return Err(BookingError::LimitExceeded("comment too long"));
        }
        let transition = Transition::Approve {
            by: approver,
            convert_to_confirmed: approval.convert_to_confirmed,
            admin_comment: approval.admin_comment,
        };
        let (before, approved) = with_retries!(
            self,
            "approve",
            self.try_transition(&Actor::Admin(approver), id, transition.clone())
        )?;
        info!("booking {id} approved by {approver}");
        self.notify.send(BookingEvent::Approved { id, by: approver });
        if before.booking_type != approved.booking_type {
            self.notify.send(BookingEvent::Confirmed { id });
        }
        self.arm(&approved).await;
        Ok(approved)
    }

    /// Temporary → confirmed. Clears the deadline and disarms its timers.
    pub async fn confirm_temporary(&self, actor: Actor, id: BookingId) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result: Result<Booking, BookingError> = async {
            let (_, confirmed) = with_retries!(
                self,
                "confirm_temporary",
                self.try_transition(&actor, id, Transition::Confirm)
            )?;
            info!("booking {id} confirmed, fee now {}%", confirmed.cancellation_fee_percent);
            self.disarm(id).await;
            self.notify.send(BookingEvent::Confirmed { id });
            Ok(confirmed)
        }
        .await;
        record("confirm_temporary", started, &result);
        result
    }

    /// Status/type change that keeps the booking in its slot.
    async fn try_transition(
        &self,
        actor: &Actor,
        id: BookingId,
        transition: Transition,
    ) -> Result<(Booking, Booking), BookingError> {
        let (current, version) = self.load_for(actor, id).await?;
        let next = state::apply(&current, transition, self.now())?;
        let mut txn = self.txn();
        txn.put_booking(&next, Condition::VersionIs(version));
        txn.put_slot(&next);
        self.commit(txn).await?;
        Ok((current, next))
    }

    pub async fn reject(
        &self,
        approver: UserId,
        id: BookingId,
        rejection: Rejection,
    ) -> Result<Release, BookingError> {
        let started = Instant::now();
        let result: Result<Release, BookingError> = async {
            check_reason(&rejection.reason)?;
            let transition = Transition::Reject {
                by: approver,
                reason: rejection.reason,
                admin_comment: rejection.admin_comment,
            };
            let release = self
                .release(&Actor::Admin(approver), id, transition, "reject")
                .await?;
            info!("booking {id} rejected by {approver}");
            Ok(release)
        }
        .await;
        record("reject", started, &result);
        result
    }

    /// Cancel a pending or approved booking. The fee is frozen at the moment
    /// of cancellation; holders ranked below move up.
    pub async fn cancel(
        &self,
        actor: Actor,
        id: BookingId,
        reason: Option<String>,
    ) -> Result<Release, BookingError> {
        let started = Instant::now();
        let result: Result<Release, BookingError> = async {
            if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
                return Err(BookingError::LimitExceeded("reason too long"));
            }
            let release = self
                .release(&actor, id, Transition::Cancel { by: actor, reason }, "cancel")
                .await?;
            info!(
                "booking {id} cancelled, fee {}%",
                release.booking.cancellation_fee_percent
            );
            Ok(release)
        }
        .await;
        record("cancel", started, &result);
        result
    }

    /// Cancel an approved temporary booking whose deadline has passed.
    /// Anything else (already cancelled, confirmed, not yet due) is a no-op.
    /// Expiry is re-checked on the record each commit attempt is conditioned
    /// on, so a confirmation that lands first always wins.
    pub async fn expire(&self, id: BookingId) -> Result<Option<Release>, BookingError> {
        let started = Instant::now();
        let result = match self.release(&Actor::System, id, Transition::Expire, "expire").await {
            Ok(release) => {
                metrics::counter!(observability::REAPED_TOTAL).increment(1);
                info!("booking {id} expired, rank {} freed", release.freed_rank);
                Ok(Some(release))
            }
            Err(BookingError::NotExpired(_)) => {
                debug!("expire {id}: nothing to do");
                Ok(None)
            }
            Err(e) => Err(e),
        };
        record("expire", started, &result);
        result
    }

    /// Move a booking to a terminal status, drop its slot entry and promote
    /// the holders below it.
    async fn release(
        &self,
        actor: &Actor,
        id: BookingId,
        transition: Transition,
        op: &'static str,
    ) -> Result<Release, BookingError> {
        let (previous, released, plan) =
            with_retries!(self, op, self.try_release(actor, id, transition.clone()))?;
        self.disarm(id).await;
        self.notify.send(match (released.status, actor) {
            (BookingStatus::Rejected, Actor::Admin(by)) => BookingEvent::Rejected { id, by: *by },
            _ => BookingEvent::Cancelled {
                id,
                fee_percent: released.cancellation_fee_percent,
            },
        });
        let promotion = self.finish_promotion(plan).await;
        Ok(Release {
            booking: released,
            freed_rank: previous.rank,
            promotion,
        })
    }

    async fn try_release(
        &self,
        actor: &Actor,
        id: BookingId,
        transition: Transition,
    ) -> Result<(Booking, Booking, PromotionPlan), BookingError> {
        let (current, version) = self.load_for(actor, id).await?;
        let released = state::apply(&current, transition, self.now())?;

        let snapshot = self.snapshot(&[current.span]).await?;
        let mut txn = self.txn();
        txn.observe(&snapshot);
        txn.put_booking(&released, Condition::VersionIs(version));
        txn.delete_slot(&current);
        let plan = self.stage_promotion(&mut txn, &current, &snapshot).await?;
        self.commit(txn).await?;
        Ok((current, released, plan))
    }

    /// Approve each id in turn; one failure does not stop the rest.
    pub async fn approve_many(
        &self,
        approver: UserId,
        ids: &[BookingId],
        approval: Approval,
    ) -> Result<Vec<(BookingId, Result<Booking, BookingError>)>, BookingError> {
        check_bulk(ids)?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push((*id, self.approve(approver, *id, approval.clone()).await));
        }
        Ok(results)
    }

    pub async fn reject_many(
        &self,
        approver: UserId,
        ids: &[BookingId],
        rejection: Rejection,
    ) -> Result<Vec<(BookingId, Result<Release, BookingError>)>, BookingError> {
        check_bulk(ids)?;
        check_reason(&rejection.reason)?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push((*id, self.reject(approver, *id, rejection.clone()).await));
        }
        Ok(results)
    }
}
