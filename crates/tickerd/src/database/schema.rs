/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Diesel table definitions for the SQLite store.
//!
//! UUIDs are BLOB columns, timestamps are fixed-width RFC 3339 TEXT columns.

diesel::table! {
    cron_tickers (id) {
        id -> Binary,
        expression -> Text,
        function -> Text,
        request -> Binary,
        retries -> Integer,
        retry_intervals -> Text,
        description -> Nullable<Text>,
        init_identifier -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    cron_ticker_occurrences (id) {
        id -> Binary,
        cron_ticker_id -> Binary,
        status -> Text,
        lock_holder -> Nullable<Text>,
        execution_time -> Text,
        locked_at -> Nullable<Text>,
        executed_at -> Nullable<Text>,
        skipped_reason -> Nullable<Text>,
        exception_message -> Nullable<Text>,
        elapsed_time -> BigInt,
        retry_count -> Integer,
        version -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    time_tickers (id) {
        id -> Binary,
        function -> Text,
        request -> Binary,
        retries -> Integer,
        retry_intervals -> Text,
        description -> Nullable<Text>,
        init_identifier -> Nullable<Text>,
        status -> Text,
        lock_holder -> Nullable<Text>,
        execution_time -> Nullable<Text>,
        locked_at -> Nullable<Text>,
        executed_at -> Nullable<Text>,
        skipped_reason -> Nullable<Text>,
        exception_message -> Nullable<Text>,
        elapsed_time -> BigInt,
        retry_count -> Integer,
        version -> Integer,
        parent_id -> Nullable<Binary>,
        run_condition -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    outbox_state (outbox_id) {
        outbox_id -> Binary,
        lock_id -> Nullable<Text>,
        locked_at -> Nullable<Text>,
        version -> Integer,
        created -> Text,
        delivered -> Nullable<Text>,
        last_sequence_number -> Nullable<BigInt>,
        next_attempt -> Nullable<Text>,
    }
}

diesel::table! {
    outbox_messages (sequence_number) {
        sequence_number -> BigInt,
        outbox_id -> Binary,
        message_id -> Binary,
        message_type -> Text,
        content_type -> Text,
        body -> Text,
        headers -> Nullable<Text>,
        conversation_id -> Nullable<Binary>,
        correlation_id -> Nullable<Binary>,
        initiator_id -> Nullable<Binary>,
        request_id -> Nullable<Binary>,
        source_address -> Nullable<Text>,
        destination_address -> Text,
        response_address -> Nullable<Text>,
        fault_address -> Nullable<Text>,
        enqueue_time -> Nullable<Text>,
        expiration_time -> Nullable<Text>,
        sent_time -> Text,
        delivered -> Nullable<Text>,
    }
}

diesel::table! {
    inbox_state (id) {
        id -> BigInt,
        message_id -> Binary,
        consumer_id -> Text,
        lock_id -> Nullable<Text>,
        locked_at -> Nullable<Text>,
        version -> Integer,
        received -> Text,
        receive_count -> Integer,
        expiration_time -> Nullable<Text>,
        consumed -> Nullable<Text>,
        delivered -> Nullable<Text>,
    }
}

diesel::joinable!(cron_ticker_occurrences -> cron_tickers (cron_ticker_id));
diesel::joinable!(outbox_messages -> outbox_state (outbox_id));

diesel::allow_tables_to_appear_in_same_query!(
    cron_tickers,
    cron_ticker_occurrences,
    time_tickers,
    outbox_state,
    outbox_messages,
    inbox_state,
);
